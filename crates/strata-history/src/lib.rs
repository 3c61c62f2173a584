//! # strata-history — RocksDB-backed block history with feature activation.
//!
//! - [`storage::RocksStore`] — RocksDB implementation of the indexed store
//! - [`history::BlockLedger`] — append/discard/read API behind one read/write gate
//! - [`activation::FeatureActivationTracker`] — windowed voting and activation
//! - [`config::LedgerConfig`] — file and environment configuration

pub mod activation;
pub mod config;
pub mod history;
pub mod storage;

pub use activation::{FeatureActivationTracker, StateUpdate};
pub use config::LedgerConfig;
pub use history::{BlockLedger, ChainTip, ConsistencyReport, LedgerSettings, LedgerStats};
pub use storage::RocksStore;
