//! Feature registry and activation-window arithmetic.
//!
//! Generators signal support for protocol features in every block header.
//! Votes are tallied per fixed-size window of heights; a feature whose tally
//! reaches the quorum at a window boundary is *accepted* at that height and
//! becomes *activated* one full window later:
//!
//! ```text
//! Undefined --(quorum at boundary h)--> Accepted --(height >= h + W)--> Activated
//! ```
//!
//! Everything here is a pure function of heights and settings; the persisted
//! tallies live in the history store.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::constants::NetworkType;
use crate::error::ConfigError;
use crate::types::{FeatureId, Height};

/// A protocol feature known to this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockchainFeature {
    pub id: FeatureId,
    pub description: &'static str,
}

impl BlockchainFeature {
    pub const SMALLER_MIN_GENERATING_BALANCE: Self = Self {
        id: 1,
        description: "Lower minimum generating balance",
    };
    pub const MICROBLOCKS: Self = Self {
        id: 2,
        description: "Microblock streaming between key blocks",
    };
    pub const MASS_TRANSFER: Self = Self {
        id: 3,
        description: "Mass transfer transactions",
    };
    pub const SCRIPTED_ACCOUNTS: Self = Self {
        id: 4,
        description: "Scripted accounts",
    };
    pub const DATA_TRANSACTION: Self = Self {
        id: 5,
        description: "Data transactions",
    };
    pub const BURN_ANY_TOKENS: Self = Self {
        id: 6,
        description: "Burn any tokens",
    };
}

/// Every feature this build implements.
pub const IMPLEMENTED_FEATURES: &[BlockchainFeature] = &[
    BlockchainFeature::SMALLER_MIN_GENERATING_BALANCE,
    BlockchainFeature::MICROBLOCKS,
    BlockchainFeature::MASS_TRANSFER,
    BlockchainFeature::SCRIPTED_ACCOUNTS,
    BlockchainFeature::DATA_TRANSACTION,
    BlockchainFeature::BURN_ANY_TOKENS,
];

/// Look up a known feature by id.
pub fn feature(id: FeatureId) -> Option<&'static BlockchainFeature> {
    IMPLEMENTED_FEATURES.iter().find(|f| f.id == id)
}

/// Human-readable label for log messages, e.g. `3 (Mass transfer transactions)`.
pub fn describe(id: FeatureId) -> String {
    match feature(id) {
        Some(f) => format!("{} ({})", f.id, f.description),
        None => format!("{id} (unknown)"),
    }
}

/// Render a list of features for log messages.
pub fn describe_all<'a>(ids: impl IntoIterator<Item = &'a FeatureId>) -> String {
    ids.into_iter()
        .map(|id| describe(*id))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Lifecycle position of a feature at some height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureStatus {
    Undefined,
    Accepted,
    Activated,
}

/// Opening height of the voting window that contains `height`.
///
/// Windows are `[1, W]`, `[W + 1, 2W]`, ...; height 0 maps to the first
/// window.
///
/// # Examples
///
/// ```
/// use strata_core::features::activation_window_opening;
/// assert_eq!(activation_window_opening(1, 3), 1);
/// assert_eq!(activation_window_opening(3, 3), 1);
/// assert_eq!(activation_window_opening(4, 3), 4);
/// assert_eq!(activation_window_opening(6, 3), 4);
/// ```
pub fn activation_window_opening(height: Height, window_size: u64) -> Height {
    let r = 1 + height - height % window_size;
    if r <= height {
        r
    } else {
        r.saturating_sub(window_size).max(1)
    }
}

/// Window size and quorum of the voting protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationSettings {
    window_size: u64,
    min_votes: u64,
}

impl ActivationSettings {
    /// Validate and build settings; requires `0 < min_votes <= window_size`.
    pub fn new(window_size: u64, min_votes: u64) -> Result<Self, ConfigError> {
        if window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if min_votes == 0 || min_votes > window_size {
            return Err(ConfigError::InvalidQuorum {
                min_votes,
                window_size,
            });
        }
        Ok(Self {
            window_size,
            min_votes,
        })
    }

    /// Network defaults.
    pub fn for_network(network: NetworkType) -> Self {
        Self {
            window_size: network.activation_window_size(),
            min_votes: network.min_votes_within_window(),
        }
    }

    pub fn window_size(&self) -> u64 {
        self.window_size
    }

    pub fn min_votes(&self) -> u64 {
        self.min_votes
    }

    /// See [`activation_window_opening`].
    pub fn window_opening(&self, height: Height) -> Height {
        activation_window_opening(height, self.window_size)
    }

    /// Whether the state-update step runs at `height`.
    pub fn is_window_boundary(&self, height: Height) -> bool {
        height > 0 && height % self.window_size == 0
    }

    /// Status of a feature accepted at `accepted_at` (if ever), seen at `current`.
    pub fn status(&self, accepted_at: Option<Height>, current: Height) -> FeatureStatus {
        match accepted_at {
            None => FeatureStatus::Undefined,
            Some(h) if h + self.window_size <= current => FeatureStatus::Activated,
            Some(_) => FeatureStatus::Accepted,
        }
    }

    /// Height at which a feature accepted at `accepted_at` activates.
    pub fn activation_height(&self, accepted_at: Height) -> Height {
        accepted_at + self.window_size
    }
}

impl Default for ActivationSettings {
    fn default() -> Self {
        Self::for_network(NetworkType::default())
    }
}

/// What this build supports and how it reacts to what it does not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSettings {
    /// Stop the node when an unimplemented feature activates.
    pub auto_shutdown_on_unsupported_feature: bool,
    pub implemented: BTreeSet<FeatureId>,
}

impl FeatureSettings {
    pub fn is_implemented(&self, id: FeatureId) -> bool {
        self.implemented.contains(&id)
    }

    /// The subset of `ids` this build does not implement, ascending.
    pub fn unimplemented<'a>(&self, ids: impl IntoIterator<Item = &'a FeatureId>) -> Vec<FeatureId> {
        let mut out: Vec<FeatureId> = ids
            .into_iter()
            .copied()
            .filter(|id| !self.is_implemented(*id))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            auto_shutdown_on_unsupported_feature: true,
            implemented: IMPLEMENTED_FEATURES.iter().map(|f| f.id).collect(),
        }
    }
}
