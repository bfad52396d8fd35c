//! Vault lifecycle and key custody.
//!
//! A [`VaultService`] moves through `NotConfigured -> Locked <-> Unlocked`.
//! While unlocked it holds the data encryption key (DEK) in memory and
//! serves encrypt/decrypt calls keyed by it. Locking wipes the DEK.

use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{VaultOptions, VaultRecord, ALGORITHM, KDF};
use nascrypt_common::{Error, Result, VaultState};
use nascrypt_crypto::{EncryptedKeyMaterial, SecretKey, StreamCipher};

/// Key material present only while unlocked.
struct Session {
    dek: SecretKey,
    cipher: StreamCipher,
}

impl Session {
    fn new(dek: SecretKey) -> Self {
        let cipher = StreamCipher::from_key(dek.clone());
        Self { dek, cipher }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cipher.close();
    }
}

/// Consecutive unlock failures and the lockout they trigger.
#[derive(Debug, Default)]
struct Throttle {
    failures: u32,
    locked_until: Option<Instant>,
}

impl Throttle {
    /// Remaining lockout, clearing an expired one.
    fn remaining(&mut self, now: Instant) -> Option<Duration> {
        match self.locked_until {
            Some(until) if until > now => Some(until - now),
            Some(_) => {
                self.locked_until = None;
                self.failures = 0;
                None
            }
            None => None,
        }
    }

    /// Count a failure; returns true if it started a lockout.
    fn record_failure(&mut self, options: &VaultOptions, now: Instant) -> bool {
        self.failures += 1;
        if options.max_failed_unlocks > 0 && self.failures >= options.max_failed_unlocks {
            self.locked_until = Some(now + Duration::from_secs(options.lockout_secs));
            return true;
        }
        false
    }

    fn reset(&mut self) {
        self.failures = 0;
        self.locked_until = None;
    }
}

struct Inner {
    vault_path: PathBuf,
    session: Option<Session>,
    throttle: Throttle,
}

/// Snapshot of a vault for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultStatus {
    pub state: VaultState,
    pub configured: bool,
    pub unlocked: bool,
    pub vault_path: PathBuf,
    pub version: u8,
    pub algorithm: &'static str,
    pub kdf: &'static str,
    pub failed_unlocks: u32,
}

/// Master-key custody state machine.
///
/// Thread-safe: data operations share a read lock and run in parallel;
/// transitions take the write lock and wait for them to drain.
pub struct VaultService {
    inner: RwLock<Inner>,
    options: VaultOptions,
}

impl VaultService {
    /// Create a service for the vault directory at `vault_path`.
    pub fn new(vault_path: impl Into<PathBuf>) -> Self {
        Self::with_options(vault_path, VaultOptions::default())
    }

    /// Create a service with explicit options.
    pub fn with_options(vault_path: impl Into<PathBuf>, options: VaultOptions) -> Self {
        Self {
            inner: RwLock::new(Inner {
                vault_path: vault_path.into(),
                session: None,
                throttle: Throttle::default(),
            }),
            options,
        }
    }

    /// Options in effect.
    pub fn options(&self) -> &VaultOptions {
        &self.options
    }

    /// Create the vault under `password` and unlock it.
    ///
    /// # Errors
    /// - `VaultAlreadyConfigured` if a record exists
    /// - `Io` if the record cannot be written
    pub fn setup(&self, password: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.session.is_some() || VaultRecord::exists(&inner.vault_path) {
            return Err(Error::VaultAlreadyConfigured);
        }

        let dek = SecretKey::generate();
        let record = VaultRecord::create(&dek, password)?;
        record.save(&inner.vault_path)?;

        inner.session = Some(Session::new(dek));
        inner.throttle.reset();
        info!(path = %inner.vault_path.display(), "vault configured");
        Ok(())
    }

    /// Unwrap the DEK with `password`.
    ///
    /// # Errors
    /// - `VaultAlreadyUnlocked` if unlocked
    /// - `VaultNotConfigured` if there is no record
    /// - `UnlockThrottled` during a lockout
    /// - `InvalidPassword` for a wrong password
    /// - `Format` for an incompatible record
    pub fn unlock(&self, password: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.session.is_some() {
            return Err(Error::VaultAlreadyUnlocked);
        }

        let record = VaultRecord::load(&inner.vault_path)?.ok_or(Error::VaultNotConfigured)?;
        self.check_throttle(&mut inner)?;

        let dek = self.verify_password(&mut inner, &record, password)?;
        inner.session = Some(Session::new(dek));
        info!(path = %inner.vault_path.display(), "vault unlocked");
        Ok(())
    }

    /// Wipe the DEK.
    ///
    /// # Errors
    /// - `VaultNotConfigured` if there is no record
    /// - `VaultAlreadyLocked` if already locked; nothing changes
    pub fn lock(&self) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.session.take() {
            Some(session) => {
                drop(session);
                info!(path = %inner.vault_path.display(), "vault locked");
                Ok(())
            }
            None if VaultRecord::exists(&inner.vault_path) => Err(Error::VaultAlreadyLocked),
            None => Err(Error::VaultNotConfigured),
        }
    }

    /// True if a vault record exists at the current path.
    pub fn is_configured(&self) -> bool {
        let inner = self.inner.read();
        inner.session.is_some() || VaultRecord::exists(&inner.vault_path)
    }

    /// True while the DEK is loaded.
    pub fn is_unlocked(&self) -> bool {
        self.inner.read().session.is_some()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> VaultState {
        Self::state_of(&self.inner.read())
    }

    fn state_of(inner: &Inner) -> VaultState {
        if inner.session.is_some() {
            VaultState::Unlocked
        } else if VaultRecord::exists(&inner.vault_path) {
            VaultState::Locked
        } else {
            VaultState::NotConfigured
        }
    }

    /// Status snapshot.
    pub fn status(&self) -> VaultStatus {
        let inner = self.inner.read();
        let state = Self::state_of(&inner);
        VaultStatus {
            state,
            configured: state.is_configured(),
            unlocked: state.is_unlocked(),
            vault_path: inner.vault_path.clone(),
            version: nascrypt_crypto::VERSION,
            algorithm: ALGORITHM,
            kdf: KDF,
            failed_unlocks: inner.throttle.failures,
        }
    }

    /// Encrypt an in-memory buffer with the DEK.
    pub fn encrypt_data(&self, data: &[u8]) -> Result<Vec<u8>> {
        let inner = self.inner.read();
        Self::session(&inner)?.cipher.encrypt_bytes(data)
    }

    /// Decrypt an in-memory container with the DEK.
    pub fn decrypt_data(&self, data: &[u8]) -> Result<Vec<u8>> {
        let inner = self.inner.read();
        Self::session(&inner)?.cipher.decrypt_bytes(data)
    }

    /// Encrypt `reader` into `writer` with the DEK.
    ///
    /// Holds the read lock for the whole stream, so `lock` waits for it.
    pub fn encrypt_stream<R: Read, W: Write>(&self, reader: R, writer: W) -> Result<u64> {
        let inner = self.inner.read();
        Self::session(&inner)?.cipher.encrypt_stream(reader, writer)
    }

    /// Decrypt `reader` into `writer` with the DEK.
    pub fn decrypt_stream<R: Read, W: Write>(&self, reader: R, writer: W) -> Result<u64> {
        let inner = self.inner.read();
        Self::session(&inner)?.cipher.decrypt_stream(reader, writer)
    }

    /// Decrypt the plaintext range starting at `start` with the DEK.
    pub fn decrypt_range<R: Read + Seek, W: Write>(
        &self,
        reader: R,
        writer: W,
        start: u64,
        max_len: Option<u64>,
    ) -> Result<u64> {
        let inner = self.inner.read();
        Self::session(&inner)?
            .cipher
            .decrypt_range(reader, writer, start, max_len)
    }

    /// Current vault directory.
    pub fn vault_path(&self) -> PathBuf {
        self.inner.read().vault_path.clone()
    }

    /// Point the service at another vault directory.
    ///
    /// # Errors
    /// - `VaultUnlocked` while unlocked
    pub fn set_vault_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.session.is_some() {
            return Err(Error::VaultUnlocked);
        }

        inner.vault_path = path.as_ref().to_path_buf();
        debug!(path = %inner.vault_path.display(), "vault path changed");
        Ok(())
    }

    /// Re-wrap the DEK under `new_password`.
    ///
    /// The DEK itself is unchanged, so existing containers stay readable.
    ///
    /// # Errors
    /// - `VaultLocked` unless unlocked
    /// - `InvalidPassword` if `old_password` is wrong
    /// - `UnlockThrottled` during a lockout
    pub fn change_password(&self, old_password: &[u8], new_password: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.session.is_none() {
            return Err(Error::VaultLocked);
        }

        let mut record =
            VaultRecord::load(&inner.vault_path)?.ok_or(Error::VaultNotConfigured)?;
        self.check_throttle(&mut inner)?;

        let dek = self.verify_password(&mut inner, &record, old_password)?;
        record.rewrap(&dek, new_password)?;
        record.save(&inner.vault_path)?;

        info!(path = %inner.vault_path.display(), "vault password changed");
        Ok(())
    }

    /// Wrap the DEK under `recipient_password` for a share recipient.
    ///
    /// # Errors
    /// - `VaultLocked` unless unlocked
    pub fn export_key_material(
        &self,
        recipient_password: &[u8],
    ) -> Result<EncryptedKeyMaterial> {
        let inner = self.inner.read();
        let session = Self::session(&inner)?;
        EncryptedKeyMaterial::wrap(&session.dek, recipient_password)
    }

    /// Serialized vault record, for backup off this machine.
    ///
    /// Works while locked. The record only holds the password-wrapped DEK.
    ///
    /// # Errors
    /// - `VaultNotConfigured` if there is no record
    pub fn export_record(&self) -> Result<Vec<u8>> {
        let inner = self.inner.read();
        let record = VaultRecord::load(&inner.vault_path)?.ok_or(Error::VaultNotConfigured)?;
        debug!(path = %inner.vault_path.display(), "vault record exported");
        Ok(record.to_json()?.into_bytes())
    }

    /// Install a record produced by [`VaultService::export_record`].
    ///
    /// The vault ends up Locked; unlock it with the password it was
    /// exported under.
    ///
    /// # Errors
    /// - `VaultAlreadyConfigured` if a record exists at the current path
    /// - `Serialization` or `Format` for a malformed or incompatible record
    pub fn import_record(&self, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.session.is_some() || VaultRecord::exists(&inner.vault_path) {
            return Err(Error::VaultAlreadyConfigured);
        }

        let json = std::str::from_utf8(bytes)
            .map_err(|e| Error::Serialization(format!("Vault record is not UTF-8: {}", e)))?;
        let record = VaultRecord::from_json(json)?;
        record.validate()?;
        record.save(&inner.vault_path)?;

        inner.throttle.reset();
        info!(path = %inner.vault_path.display(), "vault record restored");
        Ok(())
    }

    fn session(inner: &Inner) -> Result<&Session> {
        inner.session.as_ref().ok_or(Error::VaultLocked)
    }

    fn check_throttle(&self, inner: &mut Inner) -> Result<()> {
        match inner.throttle.remaining(Instant::now()) {
            Some(left) => {
                // Round up so callers never retry a moment too early.
                let retry_after_secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
                warn!(retry_after_secs, "unlock attempt during lockout");
                Err(Error::UnlockThrottled { retry_after_secs })
            }
            None => Ok(()),
        }
    }

    fn verify_password(
        &self,
        inner: &mut Inner,
        record: &VaultRecord,
        password: &[u8],
    ) -> Result<SecretKey> {
        match record.unwrap_dek(password) {
            Ok(dek) => {
                inner.throttle.reset();
                Ok(dek)
            }
            Err(Error::InvalidPassword) => {
                let locked = inner.throttle.record_failure(&self.options, Instant::now());
                warn!(failures = inner.throttle.failures, "invalid vault password");
                if locked {
                    error!(
                        lockout_secs = self.options.lockout_secs,
                        "too many failed unlock attempts, vault locked out"
                    );
                }
                Err(Error::InvalidPassword)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_locks_after_limit() {
        let options = VaultOptions {
            max_failed_unlocks: 3,
            lockout_secs: 60,
        };
        let mut throttle = Throttle::default();
        let now = Instant::now();

        assert!(!throttle.record_failure(&options, now));
        assert!(!throttle.record_failure(&options, now));
        assert!(throttle.record_failure(&options, now));

        let left = throttle.remaining(now).unwrap();
        assert_eq!(left, Duration::from_secs(60));
        assert!(throttle.remaining(now + Duration::from_secs(61)).is_none());
        assert_eq!(throttle.failures, 0);
    }

    #[test]
    fn test_throttle_reset() {
        let options = VaultOptions::default();
        let mut throttle = Throttle::default();
        let now = Instant::now();

        for _ in 0..4 {
            throttle.record_failure(&options, now);
        }
        throttle.reset();

        assert!(!throttle.record_failure(&options, now));
        assert!(throttle.remaining(now).is_none());
    }

    #[test]
    fn test_zero_limit_disables_lockout() {
        let options = VaultOptions {
            max_failed_unlocks: 0,
            lockout_secs: 60,
        };
        let mut throttle = Throttle::default();
        let now = Instant::now();

        for _ in 0..10 {
            assert!(!throttle.record_failure(&options, now));
        }
        assert!(throttle.remaining(now).is_none());
    }

    #[test]
    fn test_fresh_service_state() {
        let dir = tempfile::TempDir::new().unwrap();
        let service = VaultService::new(dir.path().join("vault"));

        assert_eq!(service.state(), VaultState::NotConfigured);
        assert!(!service.is_configured());
        assert!(!service.is_unlocked());

        let status = service.status();
        assert_eq!(status.version, 2);
        assert_eq!(status.algorithm, "XChaCha20-Poly1305");
        assert_eq!(status.kdf, "Argon2id");
        assert!(!status.configured);
    }

    #[test]
    fn test_options_are_kept() {
        let options = VaultOptions {
            max_failed_unlocks: 9,
            lockout_secs: 15,
        };
        let service = VaultService::with_options("/nonexistent/vault", options);
        assert_eq!(*service.options(), options);
        assert_eq!(*VaultService::new("/nonexistent/vault").options(), VaultOptions::default());
    }

    #[test]
    fn test_export_record_requires_vault() {
        let dir = tempfile::TempDir::new().unwrap();
        let service = VaultService::new(dir.path().join("vault"));

        assert!(matches!(service.export_record(), Err(Error::VaultNotConfigured)));
    }

    #[test]
    fn test_import_rejects_garbage() {
        let dir = tempfile::TempDir::new().unwrap();
        let service = VaultService::new(dir.path().join("vault"));

        assert!(matches!(
            service.import_record(b"{ not a record"),
            Err(Error::Serialization(_))
        ));
        assert!(matches!(
            service.import_record(&[0xff, 0xfe]),
            Err(Error::Serialization(_))
        ));
        assert_eq!(service.state(), VaultState::NotConfigured);
    }
}
