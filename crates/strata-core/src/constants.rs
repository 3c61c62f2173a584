//! Protocol and storage constants.

use serde::{Deserialize, Serialize};

/// Network type: Mainnet, Testnet, or Regtest.
///
/// Controls the feature-activation window defaults and the data directory
/// suffix.
///
/// # Examples
///
/// ```
/// use strata_core::constants::NetworkType;
/// let net = NetworkType::default();
/// assert_eq!(net, NetworkType::Mainnet);
/// assert_eq!(net.activation_window_size(), 5_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Production network.
    #[default]
    Mainnet,
    /// Public test network with a shorter voting window.
    Testnet,
    /// Local regression-test network: tiny windows for fast activation.
    Regtest,
}

impl NetworkType {
    /// Blocks per feature-activation voting window.
    pub fn activation_window_size(&self) -> u64 {
        match self {
            Self::Mainnet => 5_000,
            Self::Testnet => 3_000,
            Self::Regtest => 3,
        }
    }

    /// Votes within one window required to accept a feature.
    pub fn min_votes_within_window(&self) -> u64 {
        match self {
            Self::Mainnet => 4_000,
            Self::Testnet => 2_700,
            Self::Regtest => 2,
        }
    }

    /// Subdirectory name under the base data directory.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_core::constants::NetworkType;
    /// assert_eq!(NetworkType::Mainnet.data_dir_suffix(), "mainnet");
    /// assert_eq!(NetworkType::Regtest.data_dir_suffix(), "regtest");
    /// ```
    pub fn data_dir_suffix(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }
}

/// Heights between opportunistic physical compactions.
pub const DEFAULT_COMPACTION_INTERVAL: u64 = 100;

/// On-disk layout version stamped into the metadata column.
pub const SCHEMA_VERSION: u32 = 1;

/// Largest encoded block accepted from an import file (1 MiB).
pub const MAX_BLOCK_SIZE: usize = 1_048_576;

/// Cap on identifiers returned by a single `block_ids_after` call.
pub const MAX_BLOCK_IDS_PER_REQUEST: usize = 2000;
