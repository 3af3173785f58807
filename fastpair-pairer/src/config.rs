//! Pairer configuration, persisted as `config.json` in the fastpair home

use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";

/// Feature switches that change how account keys are provisioned
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PairerConfig {
    /// Push opt-in status updates after a device is saved to the account
    #[serde(default = "default_true")]
    pub saved_devices_enabled: bool,
    /// Check the account's opt-in status before writing an account key
    #[serde(default)]
    pub strict_opt_in: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PairerConfig {
    fn default() -> Self {
        Self {
            saved_devices_enabled: true,
            strict_opt_in: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory, set FASTPAIR_HOME")]
    NoHome,
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// `$FASTPAIR_HOME`, or `~/.fastpair`
pub fn fastpair_home() -> Result<PathBuf, ConfigError> {
    if let Ok(home) = std::env::var("FASTPAIR_HOME") {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".fastpair"))
        .ok_or(ConfigError::NoHome)
}

impl PairerConfig {
    pub fn path(home: &Path) -> PathBuf {
        home.join(CONFIG_FILE)
    }

    /// Load `config.json` from `home`, writing the defaults on first use
    pub fn load_or_create(home: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(home);
        let io_err = |source: std::io::Error| ConfigError::Io { path: path.clone(), source };

        if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(io_err)?;
            return serde_json::from_str(&data)
                .map_err(|source| ConfigError::Parse { path: path.clone(), source });
        }

        std::fs::create_dir_all(home).map_err(io_err)?;
        let config = Self::default();
        let data = serde_json::to_string_pretty(&config)
            .map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
        std::fs::write(&path, data).map_err(io_err)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_load_writes_defaults() {
        let home = tempfile::tempdir().unwrap();
        let config = PairerConfig::load_or_create(home.path()).unwrap();
        assert_eq!(config, PairerConfig::default());
        assert!(PairerConfig::path(home.path()).exists());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(PairerConfig::path(home.path()), r#"{"strict_opt_in": true}"#).unwrap();

        let config = PairerConfig::load_or_create(home.path()).unwrap();
        assert!(config.strict_opt_in);
        assert!(config.saved_devices_enabled);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(PairerConfig::path(home.path()), "not json").unwrap();

        assert!(matches!(
            PairerConfig::load_or_create(home.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
