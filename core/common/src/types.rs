//! Common types used throughout NasCrypt.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a vault.
///
/// `NotConfigured` moves to `Unlocked` through setup; once configured the
/// vault cycles freely between `Locked` and `Unlocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultState {
    /// No persisted vault record exists.
    NotConfigured,
    /// A record exists but the data key is not in memory.
    Locked,
    /// The data key is in memory and data operations are allowed.
    Unlocked,
}

impl VaultState {
    /// True once a vault record has been created.
    pub fn is_configured(&self) -> bool {
        !matches!(self, VaultState::NotConfigured)
    }

    /// True only while the data key is loaded.
    pub fn is_unlocked(&self) -> bool {
        matches!(self, VaultState::Unlocked)
    }
}

impl fmt::Display for VaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VaultState::NotConfigured => "not configured",
            VaultState::Locked => "locked",
            VaultState::Unlocked => "unlocked",
        };
        write!(f, "{}", s)
    }
}
