//! Layered configuration.
//!
//! A [`Config`] is produced by [`merge_layers`] from the built-in defaults
//! and a list of partial [`ConfigLayer`]s. The binaries apply the layers in
//! this fixed order, later layers overriding earlier ones field by field:
//!
//! 1. defaults ([`Config::default`])
//! 2. YAML file ([`ConfigLayer::from_yaml_file`])
//! 3. environment, including `.env` ([`ConfigLayer::from_env`])
//! 4. command-line flags

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub http: HttpConfig,
    pub tracker: TrackerConfig,
    pub storage: StorageConfig,
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub endpoints: Vec<String>,
    pub checkpoint_path: String,
    pub batch_size: u64,
    pub progress: bool,
    pub queue_capacity: usize,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub backend: String,
    pub endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            http: HttpConfig {
                addr: "127.0.0.1:5000".to_string(),
            },
            tracker: TrackerConfig {
                endpoints: vec!["https://mainnet.infura.io".to_string()],
                checkpoint_path: "data.db".to_string(),
                batch_size: 1000,
                progress: true,
                queue_capacity: 1024,
                poll_interval_secs: 12,
            },
            storage: StorageConfig {
                backend: "sqlite".to_string(),
                endpoint: "sqlite:./tracker.db".to_string(),
            },
            shutdown_timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tracker.endpoints.iter().all(|url| url.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "at least one JSON-RPC endpoint must be configured".to_string(),
            ));
        }
        if self.tracker.batch_size == 0 {
            return Err(ConfigError::Validation(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.tracker.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.storage.endpoint.trim().is_empty() {
            return Err(ConfigError::Validation(
                "storage endpoint must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// A partial configuration. Unset fields leave the lower layer untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub http: HttpLayer,
    pub tracker: TrackerLayer,
    pub storage: StorageLayer,
    pub shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpLayer {
    pub addr: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerLayer {
    pub endpoints: Option<Vec<String>>,
    pub checkpoint_path: Option<String>,
    pub batch_size: Option<u64>,
    pub progress: Option<bool>,
    pub queue_capacity: Option<usize>,
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageLayer {
    pub backend: Option<String>,
    pub endpoint: Option<String>,
}

impl ConfigLayer {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path_str.clone(),
            source: e,
        })?;

        Self::from_yaml_str(&content, &path_str)
    }

    pub fn from_yaml_str(content: &str, source_name: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: source_name.to_string(),
            source: e,
        })
    }

    /// Reads `TRACKER_*` variables from the process environment, after
    /// loading a `.env` file if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a layer from an arbitrary key lookup. `TRACKER_ENDPOINTS` is a
    /// comma-separated list.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoints = lookup("TRACKER_ENDPOINTS").map(|raw| split_list(&raw));

        Ok(ConfigLayer {
            http: HttpLayer {
                addr: lookup("TRACKER_HTTP_ADDR"),
            },
            tracker: TrackerLayer {
                endpoints,
                checkpoint_path: lookup("TRACKER_CHECKPOINT_PATH"),
                batch_size: parse_var(&lookup, "TRACKER_BATCH_SIZE")?,
                progress: parse_var(&lookup, "TRACKER_PROGRESS")?,
                queue_capacity: parse_var(&lookup, "TRACKER_QUEUE_CAPACITY")?,
                poll_interval_secs: parse_var(&lookup, "TRACKER_POLL_INTERVAL_SECS")?,
            },
            storage: StorageLayer {
                backend: lookup("TRACKER_STORAGE_BACKEND"),
                endpoint: lookup("TRACKER_DB_ENDPOINT"),
            },
            shutdown_timeout_secs: parse_var(&lookup, "TRACKER_SHUTDOWN_TIMEOUT_SECS")?,
        })
    }
}

/// Folds `layers` over `base` in order. Pure: no I/O, no validation.
pub fn merge_layers(base: Config, layers: &[ConfigLayer]) -> Config {
    layers.iter().fold(base, |mut config, layer| {
        override_with(&mut config.http.addr, &layer.http.addr);

        override_with(&mut config.tracker.endpoints, &layer.tracker.endpoints);
        override_with(
            &mut config.tracker.checkpoint_path,
            &layer.tracker.checkpoint_path,
        );
        override_with(&mut config.tracker.batch_size, &layer.tracker.batch_size);
        override_with(&mut config.tracker.progress, &layer.tracker.progress);
        override_with(
            &mut config.tracker.queue_capacity,
            &layer.tracker.queue_capacity,
        );
        override_with(
            &mut config.tracker.poll_interval_secs,
            &layer.tracker.poll_interval_secs,
        );

        override_with(&mut config.storage.backend, &layer.storage.backend);
        override_with(&mut config.storage.endpoint, &layer.storage.endpoint);

        override_with(
            &mut config.shutdown_timeout_secs,
            &layer.shutdown_timeout_secs,
        );
        config
    })
}

fn override_with<T: Clone>(target: &mut T, value: &Option<T>) {
    if let Some(value) = value {
        *target = value.clone();
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn later_layers_win_field_by_field() {
        let file = ConfigLayer::from_yaml_str(
            r#"
http:
  addr: "0.0.0.0:8080"
tracker:
  batch_size: 500
  endpoints: ["http://file-node:8545"]
"#,
            "config.yaml",
        )
        .unwrap();

        let cli = ConfigLayer {
            tracker: TrackerLayer {
                batch_size: Some(50),
                ..TrackerLayer::default()
            },
            ..ConfigLayer::default()
        };

        let config = merge_layers(Config::default(), &[file, cli]);

        assert_eq!(config.http.addr, "0.0.0.0:8080");
        assert_eq!(config.tracker.batch_size, 50);
        assert_eq!(config.tracker.endpoints, vec!["http://file-node:8545"]);
        assert_eq!(config.tracker.checkpoint_path, "data.db");
        assert_eq!(config.storage.backend, "sqlite");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn no_layers_yields_defaults() {
        assert_eq!(merge_layers(Config::default(), &[]), Config::default());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn env_layer_parses_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TRACKER_ENDPOINTS", "http://a:8545, http://b:8545"),
            ("TRACKER_PROGRESS", "false"),
            ("TRACKER_DB_ENDPOINT", "sqlite::memory:"),
        ]);
        let layer =
            ConfigLayer::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        let config = merge_layers(Config::default(), &[layer]);
        assert_eq!(config.tracker.endpoints, vec!["http://a:8545", "http://b:8545"]);
        assert!(!config.tracker.progress);
        assert_eq!(config.storage.endpoint, "sqlite::memory:");
    }

    #[test]
    fn env_layer_rejects_bad_numbers() {
        let result = ConfigLayer::from_lookup(|key| {
            (key == "TRACKER_BATCH_SIZE").then(|| "lots".to_string())
        });
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { key: "TRACKER_BATCH_SIZE", .. })
        ));
    }

    #[test]
    fn unknown_yaml_field_rejected() {
        let result = ConfigLayer::from_yaml_str("tracker:\n  batchsize: 10\n", "config.yaml");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn validation_catches_zero_batch_size() {
        let mut config = Config::default();
        config.tracker.batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }
}
