use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, File, FileFormat};

use tandem_core::error::SyncError;

/// Server-side knobs, read from the `[Settings]` section of an optional INI
/// file. Everything has a default; a config file that exists but cannot be
/// used is fatal.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_address: String,
    pub port: u16,
    pub poll_interval: Duration,
    /// How long applied log identifiers are remembered. Must exceed the
    /// worst-case client retransmit window.
    pub log_retention: Duration,
    pub backup_interval: Duration,
    pub backup_directory: PathBuf,
    pub debug: bool,
}

impl Default for ServerSettings {
    fn default() -> ServerSettings {
        ServerSettings {
            bind_address: "0.0.0.0".to_string(),
            port: 55333,
            poll_interval: Duration::from_secs_f64(0.5),
            log_retention: Duration::from_secs(600),
            backup_interval: Duration::from_secs(900),
            backup_directory: PathBuf::from("."),
            debug: false,
        }
    }
}

impl ServerSettings {
    pub fn load(path: &Path) -> Result<ServerSettings, SyncError> {
        if !path.is_file() {
            return Err(SyncError::ConfigError(format!(
                "config file {} not found",
                path.display()
            )));
        }

        let path_str = path.to_str().ok_or_else(|| {
            SyncError::ConfigError(format!("config path {} is not UTF-8", path.display()))
        })?;

        let raw = Config::builder()
            .add_source(File::new(path_str, FileFormat::Ini))
            .build()
            .map_err(|e| SyncError::ConfigError(format!("{}: {e}", path.display())))?;

        let mut settings = ServerSettings::default();
        let get = |key: &str| raw.get_string(&format!("Settings.{key}")).ok();

        if let Some(v) = get("BIND_ADDRESS") {
            settings.bind_address = v;
        }
        if let Some(v) = get("SERVER_PORT") {
            settings.port = v
                .trim()
                .parse::<u16>()
                .map_err(|_| bad_value("SERVER_PORT", &v, "a port number"))?;
        }
        if let Some(v) = get("POLL_INTERVAL") {
            settings.poll_interval = parse_seconds("POLL_INTERVAL", &v)?;
        }
        if let Some(v) = get("LOG_RETENTION_DURATION") {
            settings.log_retention = parse_seconds("LOG_RETENTION_DURATION", &v)?;
        }
        if let Some(v) = get("BACKUP_INTERVAL") {
            settings.backup_interval = parse_seconds("BACKUP_INTERVAL", &v)?;
        }
        if let Some(v) = get("BACKUP_DIRECTORY") {
            settings.backup_directory = PathBuf::from(v);
        }
        if let Some(v) = get("DEBUG") {
            settings.debug = match v.trim().to_ascii_lowercase().as_str() {
                "yes" | "true" | "1" => true,
                "no" | "false" | "0" => false,
                _ => return Err(bad_value("DEBUG", &v, "yes or no")),
            };
        }

        Ok(settings)
    }
}

fn bad_value(key: &str, value: &str, wanted: &str) -> SyncError {
    SyncError::ConfigError(format!("{key} = {value:?}: expected {wanted}"))
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration, SyncError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| *secs >= 0.0 && secs.is_finite())
        .map(Duration::from_secs_f64)
        .ok_or_else(|| bad_value(key, value, "a non-negative number of seconds"))
}
