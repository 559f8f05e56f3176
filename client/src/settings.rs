use std::path::Path;
use std::time::Duration;

use config::{Config, File, FileFormat};

use tandem_core::error::SyncError;

/// Everything the client reads from the `[Settings]` section of its INI
/// file. Missing keys fall back to these defaults; present-but-unusable
/// values are fatal.
#[derive(Debug, Clone)]
pub struct Settings {
    pub sync_inventory: bool,
    pub sync_chests: bool,
    pub sync_status: bool,
    pub sync_gp: bool,
    pub debug: bool,
    /// Sleep before every peer send, approximating WAN latency on a LAN bench.
    pub test_latency: bool,

    pub poll_interval: Duration,
    pub sync_interval: Duration,
    /// Zero disables the pause bracket entirely (test bypass).
    pub pause_delay_interval: Duration,
    /// Played time below this means no save is loaded yet; the reconciler
    /// and committer sit the tick out.
    pub minimum_played_time: u64,
    /// Going from at least this many distinct items to none is treated as a
    /// console reset rather than the player dropping everything.
    pub min_sane_inventory: usize,
    pub similarity_threshold: f64,

    pub field_item_address: u32,
    pub battle_item_address: u32,
    pub played_time_address: u32,
    pub battle_char_address: u32,
    pub status_1_address: u32,
    pub status_2_address: u32,
    pub chest_address: u32,
    pub gp_address: u32,
    pub button_map_address: u32,

    pub retroarch_port: u16,
    pub server_hostname: String,
    pub server_port: u16,
    /// When set, join this session without asking.
    pub join_session_name: Option<String>,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            sync_inventory: true,
            sync_chests: true,
            sync_status: true,
            sync_gp: true,
            debug: false,
            test_latency: false,

            poll_interval: Duration::from_secs_f64(1.01),
            sync_interval: Duration::from_secs_f64(6.0),
            pause_delay_interval: Duration::from_secs_f64(0.05),
            minimum_played_time: 600,
            min_sane_inventory: 5,
            similarity_threshold: 0.95,

            field_item_address: 0x7e1869,
            battle_item_address: 0x7e2686,
            played_time_address: 0x7e021b,
            battle_char_address: 0x7e3000,
            status_1_address: 0x7e2e98,
            status_2_address: 0x7e2ea0,
            chest_address: 0x7e1e40,
            gp_address: 0x7e1860,
            button_map_address: 0x7e1d50,

            retroarch_port: 55355,
            server_hostname: "127.0.0.1".to_string(),
            server_port: 55333,
            join_session_name: None,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Settings, SyncError> {
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

        let mut settings = Settings::default();
        let get = |key: &str| raw.get_string(&format!("Settings.{key}")).ok();

        if let Some(v) = get("SYNC_INVENTORY") {
            settings.sync_inventory = parse_flag("SYNC_INVENTORY", &v)?;
        }
        if let Some(v) = get("SYNC_CHESTS") {
            settings.sync_chests = parse_flag("SYNC_CHESTS", &v)?;
        }
        if let Some(v) = get("SYNC_STATUS") {
            settings.sync_status = parse_flag("SYNC_STATUS", &v)?;
        }
        if let Some(v) = get("SYNC_GP") {
            settings.sync_gp = parse_flag("SYNC_GP", &v)?;
        }
        if let Some(v) = get("DEBUG") {
            settings.debug = parse_flag("DEBUG", &v)?;
        }
        if let Some(v) = get("TEST_LATENCY") {
            settings.test_latency = parse_flag("TEST_LATENCY", &v)?;
        }

        if let Some(v) = get("POLL_INTERVAL") {
            settings.poll_interval = parse_seconds("POLL_INTERVAL", &v)?;
        }
        if let Some(v) = get("SYNC_INTERVAL") {
            settings.sync_interval = parse_seconds("SYNC_INTERVAL", &v)?;
        }
        if let Some(v) = get("PAUSE_DELAY_INTERVAL") {
            settings.pause_delay_interval = parse_seconds("PAUSE_DELAY_INTERVAL", &v)?;
        }
        if let Some(v) = get("MINIMUM_PLAYED_TIME") {
            settings.minimum_played_time = parse_integer("MINIMUM_PLAYED_TIME", &v)?;
        }
        if let Some(v) = get("MIN_SANE_INVENTORY") {
            settings.min_sane_inventory = parse_integer("MIN_SANE_INVENTORY", &v)? as usize;
        }
        if let Some(v) = get("SIMILARITY_THRESHOLD") {
            settings.similarity_threshold = parse_ratio("SIMILARITY_THRESHOLD", &v)?;
        }

        if let Some(v) = get("FIELD_ITEM_ADDRESS") {
            settings.field_item_address = parse_address("FIELD_ITEM_ADDRESS", &v)?;
        }
        if let Some(v) = get("BATTLE_ITEM_ADDRESS") {
            settings.battle_item_address = parse_address("BATTLE_ITEM_ADDRESS", &v)?;
        }
        if let Some(v) = get("PLAYED_TIME_ADDRESS") {
            settings.played_time_address = parse_address("PLAYED_TIME_ADDRESS", &v)?;
        }
        if let Some(v) = get("BATTLE_CHAR_ADDRESS") {
            settings.battle_char_address = parse_address("BATTLE_CHAR_ADDRESS", &v)?;
        }
        if let Some(v) = get("STATUS_1_ADDRESS") {
            settings.status_1_address = parse_address("STATUS_1_ADDRESS", &v)?;
        }
        if let Some(v) = get("STATUS_2_ADDRESS") {
            settings.status_2_address = parse_address("STATUS_2_ADDRESS", &v)?;
        }
        if let Some(v) = get("CHEST_ADDRESS") {
            settings.chest_address = parse_address("CHEST_ADDRESS", &v)?;
        }
        if let Some(v) = get("GP_ADDRESS") {
            settings.gp_address = parse_address("GP_ADDRESS", &v)?;
        }
        if let Some(v) = get("BUTTON_MAP_ADDRESS") {
            settings.button_map_address = parse_address("BUTTON_MAP_ADDRESS", &v)?;
        }

        if let Some(v) = get("RETROARCH_PORT") {
            settings.retroarch_port = parse_port("RETROARCH_PORT", &v)?;
        }
        if let Some(v) = get("SERVER_HOSTNAME") {
            settings.server_hostname = v;
        }
        if let Some(v) = get("SERVER_PORT") {
            settings.server_port = parse_port("SERVER_PORT", &v)?;
        }
        settings.join_session_name = get("JOIN_SESSION_NAME").filter(|name| !name.is_empty());

        Ok(settings)
    }
}

fn bad_value(key: &str, value: &str, wanted: &str) -> SyncError {
    SyncError::ConfigError(format!("{key} = {value:?}: expected {wanted}"))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, SyncError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        _ => Err(bad_value(key, value, "yes or no")),
    }
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

fn parse_integer(key: &str, value: &str) -> Result<u64, SyncError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| bad_value(key, value, "a non-negative integer"))
}

fn parse_ratio(key: &str, value: &str) -> Result<f64, SyncError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|ratio| (0.0..=1.0).contains(ratio))
        .ok_or_else(|| bad_value(key, value, "a number in [0, 1]"))
}

fn parse_address(key: &str, value: &str) -> Result<u32, SyncError> {
    let digits = value
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|_| bad_value(key, value, "a hexadecimal address"))
}

fn parse_port(key: &str, value: &str) -> Result<u16, SyncError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| bad_value(key, value, "a port number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "tandem-settings-test-{}-{}.ini",
            std::process::id(),
            contents.len()
        ));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Settings::load(Path::new("/nonexistent/tandem.ini")).unwrap_err();
        assert!(matches!(err, SyncError::ConfigError(_)));
    }

    #[test]
    fn values_override_defaults() {
        let path = write_config(
            "[Settings]\n\
             SYNC_CHESTS = no\n\
             DEBUG = yes\n\
             POLL_INTERVAL = 0.5\n\
             SIMILARITY_THRESHOLD = 0.9\n\
             FIELD_ITEM_ADDRESS = 0x7e1869\n\
             GP_ADDRESS = 7e1860\n\
             SERVER_HOSTNAME = sync.example.net\n\
             SERVER_PORT = 41234\n\
             JOIN_SESSION_NAME = alpha\n",
        );
        let settings = Settings::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert!(!settings.sync_chests);
        assert!(settings.sync_inventory); // untouched default
        assert!(settings.debug);
        assert_eq!(settings.poll_interval, Duration::from_secs_f64(0.5));
        assert_eq!(settings.similarity_threshold, 0.9);
        assert_eq!(settings.field_item_address, 0x7e1869);
        assert_eq!(settings.gp_address, 0x7e1860);
        assert_eq!(settings.server_hostname, "sync.example.net");
        assert_eq!(settings.server_port, 41234);
        assert_eq!(settings.join_session_name.as_deref(), Some("alpha"));
    }

    #[test]
    fn unusable_values_are_fatal() {
        let path = write_config("[Settings]\nSYNC_STATUS = maybe\n");
        let err = Settings::load(&path).unwrap_err();
        fs::remove_file(&path).ok();
        assert!(matches!(err, SyncError::ConfigError(_)));
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() {
        let path = write_config("[Settings]\nSIMILARITY_THRESHOLD = 1.5\n");
        assert!(Settings::load(&path).is_err());
        fs::remove_file(&path).ok();
    }
}
