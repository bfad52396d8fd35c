//! Vault record and service options.
//!
//! The record is the only persisted state of a vault: the data encryption
//! key (DEK) wrapped under a key derived from the master password, plus the
//! parameters needed to derive that key again.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use nascrypt_common::{Error, Result};
use nascrypt_crypto::encoding::base64_bytes;
use nascrypt_crypto::{decrypt, derive_key_with, encrypt, KdfParams, Salt, SecretKey, VERSION};

/// Record file name inside the vault directory.
pub const RECORD_FILENAME: &str = "vault.json";

/// AEAD used to wrap the DEK and to seal containers.
pub const ALGORITHM: &str = nascrypt_crypto::share::ALGORITHM;

/// KDF used to derive the key-encryption key.
pub const KDF: &str = "Argon2id";

/// Vault record version.
///
/// `major` tracks the container format version; records of another major
/// version cannot be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultVersion {
    pub major: u32,
    pub minor: u32,
}

impl VaultVersion {
    /// Current vault record version.
    pub const CURRENT: Self = Self {
        major: VERSION as u32,
        minor: 0,
    };

    /// Check if this version is compatible with the current version.
    pub fn is_compatible(&self) -> bool {
        self.major == Self::CURRENT.major
    }
}

impl Default for VaultVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Persisted vault record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub version: VaultVersion,
    pub algorithm: String,
    pub kdf: String,
    pub kdf_params: KdfParams,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    /// nonce || ciphertext || tag of the DEK.
    #[serde(with = "base64_bytes")]
    pub wrapped_dek: Vec<u8>,
    /// BLAKE2b-128 check value of the DEK.
    #[serde(with = "base64_bytes")]
    pub key_check: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl VaultRecord {
    /// Wrap `dek` under a key derived from `password` and a fresh salt.
    ///
    /// # Errors
    /// - KDF or AEAD failure
    pub fn create(dek: &SecretKey, password: &[u8]) -> Result<Self> {
        let now = Utc::now();
        let mut record = Self {
            version: VaultVersion::CURRENT,
            algorithm: ALGORITHM.to_string(),
            kdf: KDF.to_string(),
            kdf_params: KdfParams::current(),
            salt: Vec::new(),
            wrapped_dek: Vec::new(),
            key_check: dek.key_check().to_vec(),
            created_at: now,
            modified_at: now,
        };
        record.wrap(dek, password)?;
        Ok(record)
    }

    /// Re-wrap `dek` under `password` with a fresh salt and nonce.
    ///
    /// The DEK and its check value stay the same.
    pub fn rewrap(&mut self, dek: &SecretKey, password: &[u8]) -> Result<()> {
        self.kdf_params = KdfParams::current();
        self.wrap(dek, password)?;
        self.modified_at = Utc::now();
        Ok(())
    }

    fn wrap(&mut self, dek: &SecretKey, password: &[u8]) -> Result<()> {
        let salt = Salt::generate();
        let kek = derive_key_with(password, &salt, &self.kdf_params)?;

        self.wrapped_dek = encrypt(&kek, dek.as_bytes())?;
        self.salt = salt.as_bytes().to_vec();
        Ok(())
    }

    /// Recover the DEK with `password`.
    ///
    /// # Errors
    /// - `Format` if the record version or KDF parameters are incompatible
    /// - `InvalidPassword` if the password does not unwrap the DEK
    /// - `Vault` if the unwrapped key does not match the stored check value
    pub fn unwrap_dek(&self, password: &[u8]) -> Result<SecretKey> {
        self.validate()?;

        let salt = Salt::from_slice(&self.salt)?;
        let kek = derive_key_with(password, &salt, &self.expected_kdf_params()?)?;

        let dek_bytes = Zeroizing::new(decrypt(&kek, &self.wrapped_dek).map_err(|e| match e {
            Error::Authentication => Error::InvalidPassword,
            other => other,
        })?);
        let dek = SecretKey::from_slice(&dek_bytes)?;

        if !bool::from(dek.key_check().as_slice().ct_eq(&self.key_check)) {
            return Err(Error::Vault("Key check value mismatch".to_string()));
        }

        Ok(dek)
    }

    /// Reject records this build cannot open.
    pub fn validate(&self) -> Result<()> {
        if !self.version.is_compatible() {
            return Err(Error::Format(format!(
                "Incompatible vault version: {}.{}",
                self.version.major, self.version.minor
            )));
        }
        if self.algorithm != ALGORITHM || self.kdf != KDF {
            return Err(Error::Format(format!(
                "Unsupported vault algorithms: {} / {}",
                self.algorithm, self.kdf
            )));
        }
        if self.kdf_params != self.expected_kdf_params()? {
            return Err(Error::Format(
                "KDF parameters do not match the vault version".to_string(),
            ));
        }
        Ok(())
    }

    /// Fixed KDF parameters for this record's version.
    fn expected_kdf_params(&self) -> Result<KdfParams> {
        let version = u8::try_from(self.version.major).map_err(|_| {
            Error::Format(format!("Incompatible vault version: {}", self.version.major))
        })?;
        KdfParams::for_version(version)
    }

    /// Path of the record inside `vault_dir`.
    pub fn path_in(vault_dir: &Path) -> PathBuf {
        vault_dir.join(RECORD_FILENAME)
    }

    /// True if `vault_dir` holds a record file.
    pub fn exists(vault_dir: &Path) -> bool {
        Self::path_in(vault_dir).is_file()
    }

    /// Load the record from `vault_dir`, or `None` if there is none.
    pub fn load(vault_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path_in(vault_dir);
        match fs::read_to_string(&path) {
            Ok(json) => Self::from_json(&json).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Persist the record into `vault_dir`.
    ///
    /// The directory is created with mode 0700 and the file with 0600 on
    /// unix. The file is replaced atomically.
    pub fn save(&self, vault_dir: &Path) -> Result<()> {
        create_private_dir(vault_dir)?;

        let mut tmp = NamedTempFile::new_in(vault_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
        }
        tmp.write_all(self.to_json()?.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(Self::path_in(vault_dir))
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Serialize record to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize record from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}

fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Tunables for [`crate::VaultService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultOptions {
    /// Consecutive failed unlocks that trigger a lockout.
    pub max_failed_unlocks: u32,
    /// Lockout duration in seconds.
    pub lockout_secs: u64,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            max_failed_unlocks: 5,
            lockout_secs: 300,
        }
    }
}

impl VaultOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| Error::Serialization(e.to_string()))
    }
}
