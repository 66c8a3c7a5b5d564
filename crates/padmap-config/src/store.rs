//! JSON persistence for the engine configuration
//!
//! The persisted shape is `{ target_device, table: { entries, enabled } }`.
//! A missing file yields the default configuration; the daemon saves on
//! every mutation of the target device or mapping table.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::model::Config;

/// Default configuration path: `~/.config/padmap/config.json`.
pub fn default_config_path() -> PathBuf {
    shellexpand::tilde("~/.config/padmap/config.json")
        .into_owned()
        .into()
}

/// Load the configuration from `path`.
///
/// A missing file is not an error: the default (no target device, empty
/// table, enabled) is returned so a first run starts clean.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        tracing::info!(
            "No configuration at {}, starting with defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)?;
    let config = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(config)
}

/// Save the configuration to `path`, creating parent directories as needed.
pub fn save_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents =
        serde_json::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(path, contents)?;

    tracing::debug!("Saved configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceId;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let config = load_config(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.table.enabled);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config {
            target_device: Some(DeviceId::new("1209:0001:pad-serial-42")),
            ..Default::default()
        };
        config.table.add(79, 59);
        config.table.add(80, 60);
        config.table.set_enabled(false);

        save_config(&path, &config).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        match load_config(&path) {
            Err(ConfigError::Parse { .. }) => {}
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
