//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks.
//!
//! Parameters are fixed per container format version rather than tuned per
//! deployment: the same password and salt must yield the same key on a
//! single-board ARM machine and on a server. New parameter sets are only
//! introduced together with a new version byte.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::format::VERSION;
use crate::keys::{Salt, SecretKey, KEY_LENGTH};
use nascrypt_common::{Error, Result};

/// Parameters for Argon2id key derivation.
///
/// Field names on the wire match the share envelope format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    #[serde(rename = "memory")]
    pub memory_cost: u32,
    /// Number of iterations.
    #[serde(rename = "time")]
    pub time_cost: u32,
    /// Degree of parallelism.
    #[serde(rename = "threads")]
    pub parallelism: u32,
}

impl KdfParams {
    /// Parameter set of format version 2: one pass over 64 MiB, four lanes.
    pub const V2: Self = Self {
        memory_cost: 64 * 1024,
        time_cost: 1,
        parallelism: 4,
    };

    /// Parameters for the current format version.
    pub fn current() -> Self {
        Self::V2
    }

    /// Parameters bound to a container format version.
    ///
    /// # Errors
    /// - `Format` for versions that have no parameter set
    pub fn for_version(version: u8) -> Result<Self> {
        match version {
            VERSION => Ok(Self::V2),
            other => Err(Error::Format(format!(
                "No KDF parameters for format version 0x{:02x}",
                other
            ))),
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::current()
    }
}

/// Derive a 256-bit key from a password and salt with the current fixed
/// parameters.
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs, on any platform
///
/// # Security
/// - Password is not stored or logged
pub fn derive_key(password: &[u8], salt: &Salt) -> Result<SecretKey> {
    derive_key_with(password, salt, &KdfParams::current())
}

/// Derive a 256-bit key with explicit Argon2id parameters.
///
/// # Errors
/// - Returns error if Argon2id parameters are invalid
pub fn derive_key_with(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<SecretKey> {
    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(password, salt.as_bytes(), &mut key_bytes)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    let key = SecretKey::from_bytes(key_bytes);
    zeroize::Zeroize::zeroize(&mut key_bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Cheap parameters so the property tests stay fast; the fixed set is
    // exercised separately.
    const FAST: KdfParams = KdfParams {
        memory_cost: 8 * 1024,
        time_cost: 1,
        parallelism: 1,
    };

    #[test]
    fn test_derive_key_deterministic() {
        let salt = Salt::from_bytes([42u8; 16]);

        let key1 = derive_key(b"test-password-123", &salt).unwrap();
        let key2 = derive_key(b"test-password-123", &salt).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_salt() {
        let key1 = derive_key_with(b"pw", &Salt::from_bytes([1u8; 16]), &FAST).unwrap();
        let key2 = derive_key_with(b"pw", &Salt::from_bytes([2u8; 16]), &FAST).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_password() {
        let salt = Salt::from_bytes([42u8; 16]);

        let key1 = derive_key_with(b"password1", &salt, &FAST).unwrap();
        let key2 = derive_key_with(b"password2", &salt, &FAST).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_params_affect_key() {
        let salt = Salt::from_bytes([5u8; 16]);
        let other = KdfParams {
            time_cost: 2,
            ..FAST
        };

        let key1 = derive_key_with(b"pw", &salt, &FAST).unwrap();
        let key2 = derive_key_with(b"pw", &salt, &other).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_empty_password_is_accepted() {
        let salt = Salt::from_bytes([0u8; 16]);
        assert!(derive_key_with(b"", &salt, &FAST).is_ok());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let salt = Salt::generate();
        let params = KdfParams {
            memory_cost: 1,
            time_cost: 1,
            parallelism: 4,
        };

        assert!(matches!(
            derive_key_with(b"pw", &salt, &params),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_params_bound_to_version() {
        assert_eq!(KdfParams::for_version(VERSION).unwrap(), KdfParams::V2);
        assert_eq!(KdfParams::current(), KdfParams::V2);
        assert!(matches!(KdfParams::for_version(0x01), Err(Error::Format(_))));
        assert!(matches!(KdfParams::for_version(0x03), Err(Error::Format(_))));
    }

    #[test]
    fn test_fixed_parameter_values() {
        assert_eq!(KdfParams::V2.memory_cost, 65536);
        assert_eq!(KdfParams::V2.time_cost, 1);
        assert_eq!(KdfParams::V2.parallelism, 4);
    }

    #[test]
    fn test_params_wire_names() {
        let json = serde_json::to_value(KdfParams::V2).unwrap();
        assert_eq!(json["memory"], 65536);
        assert_eq!(json["time"], 1);
        assert_eq!(json["threads"], 4);
    }
}
