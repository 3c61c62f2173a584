//! # strata-core
//! Foundation types, storage capability, and feature-activation rules for the
//! Strata block history store.

pub mod codec;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod features;
pub mod index;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
