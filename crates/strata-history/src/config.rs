//! History store configuration.
//!
//! [`LedgerConfig`] is read from an optional TOML file and `STRATA__*`
//! environment variables (e.g. `STRATA__NETWORK=testnet`), environment
//! taking precedence. Unset activation parameters fall back to the network
//! defaults.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use strata_core::constants::{NetworkType, DEFAULT_COMPACTION_INTERVAL};
use strata_core::error::ConfigError;
use strata_core::features::{ActivationSettings, FeatureSettings, IMPLEMENTED_FEATURES};
use strata_core::types::FeatureId;

use crate::history::LedgerSettings;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "STRATA";

/// Configuration of a history store instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub network: NetworkType,
    /// Root directory for persistent data; defaults per network.
    pub data_dir: Option<PathBuf>,
    /// Log level filter string (e.g. "info", "debug", "strata_history=trace").
    pub log_level: String,
    pub activation_window_size: Option<u64>,
    pub min_votes_within_window: Option<u64>,
    pub auto_shutdown_on_unsupported_feature: bool,
    /// Overrides the features this build reports as implemented.
    pub implemented_features: Option<BTreeSet<FeatureId>>,
    pub compaction_interval: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            network: NetworkType::default(),
            data_dir: None,
            log_level: "info".to_string(),
            activation_window_size: None,
            min_votes_within_window: None,
            auto_shutdown_on_unsupported_feature: true,
            implemented_features: None,
            compaction_interval: DEFAULT_COMPACTION_INTERVAL,
        }
    }
}

impl LedgerConfig {
    /// Load from `file` (if given) and the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("implemented_features"),
        );
        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Root data directory, resolving the per-network default.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("strata")
                .join(self.network.data_dir_suffix())
        })
    }

    /// Path to the RocksDB history directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("history")
    }

    /// Validated ledger settings.
    pub fn ledger_settings(&self) -> Result<LedgerSettings, ConfigError> {
        let window = self
            .activation_window_size
            .unwrap_or_else(|| self.network.activation_window_size());
        let min_votes = self
            .min_votes_within_window
            .unwrap_or_else(|| self.network.min_votes_within_window());
        let implemented = self
            .implemented_features
            .clone()
            .unwrap_or_else(|| IMPLEMENTED_FEATURES.iter().map(|f| f.id).collect());

        let settings = LedgerSettings {
            activation: ActivationSettings::new(window, min_votes)?,
            features: FeatureSettings {
                auto_shutdown_on_unsupported_feature: self.auto_shutdown_on_unsupported_feature,
                implemented,
            },
            compaction_interval: self.compaction_interval,
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_log_level_is_info() {
        let cfg = LedgerConfig::default();
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.auto_shutdown_on_unsupported_feature);
    }

    #[test]
    fn default_data_dir_is_per_network() {
        let cfg = LedgerConfig {
            network: NetworkType::Testnet,
            ..LedgerConfig::default()
        };
        assert!(
            cfg.data_dir().ends_with("strata/testnet"),
            "data_dir should end with 'strata/testnet': {:?}",
            cfg.data_dir()
        );
    }

    #[test]
    fn db_path_appends_history() {
        let cfg = LedgerConfig {
            data_dir: Some(PathBuf::from("/tmp/strata-test")),
            ..LedgerConfig::default()
        };
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/strata-test/history"));
    }

    #[test]
    fn settings_use_network_defaults() {
        let cfg = LedgerConfig {
            network: NetworkType::Regtest,
            ..LedgerConfig::default()
        };
        let s = cfg.ledger_settings().unwrap();
        assert_eq!(s.activation.window_size(), 3);
        assert_eq!(s.activation.min_votes(), 2);
        assert_eq!(s.compaction_interval, DEFAULT_COMPACTION_INTERVAL);
        assert_eq!(s.features, FeatureSettings::default());
    }

    #[test]
    fn overrides_replace_network_defaults() {
        let cfg = LedgerConfig {
            activation_window_size: Some(10),
            min_votes_within_window: Some(7),
            implemented_features: Some([1, 9].into_iter().collect()),
            auto_shutdown_on_unsupported_feature: false,
            ..LedgerConfig::default()
        };
        let s = cfg.ledger_settings().unwrap();
        assert_eq!(s.activation.window_size(), 10);
        assert_eq!(s.activation.min_votes(), 7);
        assert!(s.features.is_implemented(9));
        assert!(!s.features.is_implemented(2));
        assert!(!s.features.auto_shutdown_on_unsupported_feature);
    }

    #[test]
    fn invalid_quorum_rejected() {
        let cfg = LedgerConfig {
            activation_window_size: Some(3),
            min_votes_within_window: Some(4),
            ..LedgerConfig::default()
        };
        assert!(matches!(
            cfg.ledger_settings(),
            Err(ConfigError::InvalidQuorum { .. })
        ));

        let cfg = LedgerConfig {
            compaction_interval: 0,
            ..LedgerConfig::default()
        };
        assert_eq!(cfg.ledger_settings(), Err(ConfigError::ZeroCompactionInterval));
    }

    #[test]
    fn load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "network = \"regtest\"").unwrap();
        writeln!(file, "log_level = \"debug\"").unwrap();
        writeln!(file, "compaction_interval = 50").unwrap();
        writeln!(file, "implemented_features = [1, 2]").unwrap();
        drop(file);

        let cfg = LedgerConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.network, NetworkType::Regtest);
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.compaction_interval, 50);
        assert_eq!(cfg.implemented_features, Some([1, 2].into_iter().collect()));
        assert!(cfg.auto_shutdown_on_unsupported_feature);
    }

    #[test]
    fn load_missing_file_fails() {
        let err = LedgerConfig::load(Some(Path::new("/nonexistent/strata.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
