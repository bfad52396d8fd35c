//! Vault key custody for NasCrypt.
//!
//! This module provides:
//! - The persisted vault record holding the password-wrapped data key
//! - The `VaultService` lifecycle: setup, unlock, lock
//! - Data encryption through the unlocked data key
//! - Password change and share key export
//!
//! # Security
//! The data key exists in memory only while the vault is unlocked and is
//! zeroized when the vault locks or the service is dropped.

pub mod config;
pub mod service;

pub use config::{VaultOptions, VaultRecord, VaultVersion, RECORD_FILENAME};
pub use nascrypt_common::VaultState;
pub use service::{VaultService, VaultStatus};
