//! Common error types for NasCrypt.

use thiserror::Error;

/// Top-level error type for NasCrypt operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Cryptographic primitive failed for a reason other than authentication.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Container header is malformed, truncated, or of an unknown version.
    #[error("Format error: {0}")]
    Format(String),

    /// AEAD tag did not verify. Deliberately carries no detail.
    #[error("Authentication failed: wrong key or corrupted data")]
    Authentication,

    /// The master password did not unwrap the stored data key.
    #[error("Invalid master password")]
    InvalidPassword,

    /// The vault exists but its data key is not loaded.
    #[error("Vault is locked")]
    VaultLocked,

    /// No vault record exists at the configured path.
    #[error("Vault is not configured")]
    VaultNotConfigured,

    /// `setup` was called on a vault that already has a record.
    #[error("Vault is already configured")]
    VaultAlreadyConfigured,

    /// `unlock` was called while the data key is loaded.
    #[error("Vault is already unlocked")]
    VaultAlreadyUnlocked,

    /// `lock` was called while no data key is loaded.
    #[error("Vault is already locked")]
    VaultAlreadyLocked,

    /// The operation requires the vault to be locked first.
    #[error("Operation not permitted while the vault is unlocked")]
    VaultUnlocked,

    /// Too many failed unlock attempts.
    #[error("Unlock temporarily disabled, retry in {retry_after_secs}s")]
    UnlockThrottled { retry_after_secs: u64 },

    /// A stream cipher was used after `close`.
    #[error("Cipher has been closed")]
    CipherClosed,

    /// Vault record is inconsistent.
    #[error("Vault error: {0}")]
    Vault(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Coarse classification callers translate into protocol responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unlock the vault and retry.
    VaultLocked,
    /// Run setup first.
    VaultNotConfigured,
    /// Wrong password or tampered data.
    Authentication,
    /// Not a NasCrypt container, or an unsupported one.
    Format,
    /// Operation invalid for the current lifecycle state.
    VaultState,
    /// Underlying reader/writer failed.
    Io,
    /// Everything else.
    Internal,
}

impl Error {
    /// Map this error onto the sentinel conditions exposed to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::VaultLocked => ErrorKind::VaultLocked,
            Error::VaultNotConfigured => ErrorKind::VaultNotConfigured,
            Error::Authentication | Error::InvalidPassword => ErrorKind::Authentication,
            Error::Format(_) => ErrorKind::Format,
            Error::VaultAlreadyConfigured
            | Error::VaultAlreadyUnlocked
            | Error::VaultAlreadyLocked
            | Error::VaultUnlocked
            | Error::UnlockThrottled { .. }
            | Error::CipherClosed => ErrorKind::VaultState,
            Error::Io(_) => ErrorKind::Io,
            Error::Crypto(_)
            | Error::Vault(_)
            | Error::Serialization(_)
            | Error::InvalidInput(_) => ErrorKind::Internal,
        }
    }

    /// True for wrong-password and tag-mismatch failures.
    pub fn is_authentication(&self) -> bool {
        self.kind() == ErrorKind::Authentication
    }

    /// True when the vault's lifecycle state refused the operation.
    pub fn is_vault_state(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::VaultLocked | ErrorKind::VaultNotConfigured | ErrorKind::VaultState
        )
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
