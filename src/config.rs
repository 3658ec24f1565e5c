use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::MemoryStore;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read the configuration file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// # Explanation
/// The configuration of the service binary. The `[remote]` table stands in for the remote configuration
/// provider: it seeds the configuration store with the filter thresholds, packet sizing, anomaly timeouts
/// and vehicle data.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub log_file: PathBuf,
    pub obu_id: String,
    pub topic_prefix: String,
    pub context_id: u32,
    pub domain_name: String,
    pub persistence_dir: PathBuf,
    pub nmea_replay: Option<PathBuf>,
    pub replay_rate: f64,
    pub remote: toml::Table,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: "info".to_string(),
            log_file: PathBuf::from("tolling.log"),
            obu_id: "obu".to_string(),
            topic_prefix: "tolling".to_string(),
            context_id: 1,
            domain_name: "TRACKING".to_string(),
            persistence_dir: PathBuf::from("."),
            nmea_replay: None,
            replay_rate: 1.0,
            remote: toml::Table::new(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// The configuration store seeded with the remote configuration.
    pub fn store(&self) -> MemoryStore {
        MemoryStore::from_table(self.remote.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use crate::config::{Config, ConfigError};
    use crate::store::RemoteSettings;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.domain_name, "TRACKING");
        assert_eq!(config.nmea_replay, None);
        assert!(config.remote.is_empty());
    }

    #[test]
    fn test_remote_table_seeds_store() {
        let config = Config::from_toml(
            r#"
            log_level = "debug"
            obu_id = "OBU-0042"
            nmea_replay = "trip.nmea"

            [remote]
            filter_time = 30
            filter_distance = 0.5
            current_axles = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.obu_id, "OBU-0042");
        assert_eq!(config.nmea_replay, Some(PathBuf::from("trip.nmea")));

        let store = config.store();
        let settings = RemoteSettings::new(&store);
        assert_eq!(settings.filter_time(), 30);
        assert_eq!(settings.filter_distance(), 0.5);
        assert_eq!(settings.vehicle_data().axles, 5);
        assert_eq!(settings.max_packet(), 4);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(Config::from_toml("replay_rate = \"fast\""), Err(ConfigError::Parse(_))));
        assert!(matches!(
            Config::load(Path::new("/nonexistent/tolling.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
