//! Common types shared across the NasCrypt crates.
//!
//! This module provides the error taxonomy that every layer reports through,
//! and the vault lifecycle state that callers branch on.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::VaultState;
