//! Invariant test suite for the Strata history store.
//!
//! Integration tests drive a RocksDB-backed ledger through randomized append
//! and discard sequences and check that the indices never drift apart, that
//! rollback is an exact inverse of append, and that feature activation
//! behaves deterministically across restarts.

pub mod helpers;
