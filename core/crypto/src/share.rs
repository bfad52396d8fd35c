//! Password-wrapped key envelopes.
//!
//! A share hands a data key to another party without revealing the vault
//! password: the key is sealed under a key derived from a separate share
//! password and serialized as JSON.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::aead::{decrypt_with_nonce, encrypt_with_nonce, NONCE_SIZE};
use crate::encoding::{decode, encode};
use crate::format::VERSION;
use crate::kdf::{derive_key_with, KdfParams};
use crate::keys::{Salt, SecretKey};
use nascrypt_common::{Error, Result};

/// AEAD name recorded in envelopes.
pub const ALGORITHM: &str = "XChaCha20-Poly1305";

/// A data key sealed under a share password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKeyMaterial {
    pub algorithm: String,
    /// Base64 of ciphertext || tag.
    pub wrapped_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argon2_params: Option<KdfParams>,
    pub version: u8,
}

impl EncryptedKeyMaterial {
    /// Seal `key` under `password` with a fresh salt and nonce.
    pub fn wrap(key: &SecretKey, password: &[u8]) -> Result<Self> {
        let salt = Salt::generate();
        let params = KdfParams::current();
        let wrapping_key = derive_key_with(password, &salt, &params)?;

        let nonce = random_nonce();
        let wrapped = encrypt_with_nonce(&wrapping_key, &nonce, key.as_bytes())?;

        Ok(Self {
            algorithm: ALGORITHM.to_string(),
            wrapped_key: encode(&wrapped),
            salt: Some(encode(salt.as_bytes())),
            nonce: Some(encode(&nonce)),
            argon2_params: Some(params),
            version: VERSION,
        })
    }

    /// Recover the data key with `password`.
    ///
    /// # Errors
    /// - `InvalidInput` for an unknown algorithm or version, or missing fields
    /// - `Serialization` for malformed base64
    /// - `Authentication` for a wrong password or altered envelope
    pub fn unwrap(&self, password: &[u8]) -> Result<SecretKey> {
        if self.algorithm != ALGORITHM {
            return Err(Error::InvalidInput(format!(
                "Unsupported key algorithm: {}",
                self.algorithm
            )));
        }
        if self.version != VERSION {
            return Err(Error::InvalidInput(format!(
                "Unsupported key material version: {}",
                self.version
            )));
        }

        let salt = Salt::from_slice(&decode("salt", required("salt", &self.salt)?)?)?;
        let nonce_bytes = decode("nonce", required("nonce", &self.nonce)?)?;
        let nonce: [u8; NONCE_SIZE] = nonce_bytes.as_slice().try_into().map_err(|_| {
            Error::InvalidInput(format!(
                "Invalid nonce length: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            ))
        })?;
        let limit = KdfParams::for_version(self.version)?;
        let params = self.argon2_params.unwrap_or(limit);
        if params.memory_cost > limit.memory_cost
            || params.time_cost > limit.time_cost
            || params.parallelism > limit.parallelism
        {
            return Err(Error::InvalidInput(format!(
                "Key material KDF parameters exceed the version {} limits",
                self.version
            )));
        }

        let wrapping_key = derive_key_with(password, &salt, &params)?;
        let wrapped = decode("wrapped_key", &self.wrapped_key)?;
        let key_bytes = Zeroizing::new(decrypt_with_nonce(&wrapping_key, &nonce, &wrapped)?);

        SecretKey::from_slice(&key_bytes)
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}

fn required<'a>(field: &str, value: &'a Option<String>) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| Error::InvalidInput(format!("Key material is missing {}", field)))
}

fn random_nonce() -> [u8; NONCE_SIZE] {
    use rand::RngCore;
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}
