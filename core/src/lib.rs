use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::threshold::ThresholdFilter;

pub mod constants;
pub mod error;
pub mod frame;
pub mod inventory;
pub mod protocol;
pub mod throttle;

use crate::error::SyncError;

/// Wire up the log facade for one of the tandem binaries.
///
/// Every record lands in `log_file`; stderr mirrors it at info, or debug
/// when the DEBUG toggle is set. Ticks fire every second, so the full
/// history belongs in the file, not the terminal. A logger that cannot be
/// set up is treated like any other unusable configuration.
pub fn init_logging(log_file: &str, debug: bool) -> Result<(), SyncError> {
    let stderr_level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let file = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {l} {m}\n",
        )))
        .build(log_file)
        .map_err(|e| SyncError::ConfigError(format!("cannot open log file {log_file}: {e}")))?;

    let console = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{h({l})} {m}\n")))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(file)))
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(stderr_level)))
                .build("console", Box::new(console)),
        )
        .build(
            Root::builder()
                .appender("file")
                .appender("console")
                .build(LevelFilter::Debug),
        )
        .map_err(|e| SyncError::ConfigError(format!("bad logging config: {e}")))?;

    log4rs::init_config(config)
        .map_err(|e| SyncError::ConfigError(format!("logger already installed: {e}")))?;

    Ok(())
}
