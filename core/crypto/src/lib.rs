//! Cryptographic core for NasCrypt.
//!
//! This module provides:
//! - Key derivation using Argon2id with fixed, per-version parameters
//! - Per-chunk nonce derivation from a random base nonce
//! - The versioned container header and sizing helpers
//! - Chunked XChaCha20-Poly1305 stream encryption with bounded memory
//! - Key wrapping envelopes for shares
//!
//! # Security Guarantees
//! - All key material is zeroized on drop
//! - No plaintext or key material is ever logged
//! - A chunk's plaintext is only written after its tag verifies

pub mod aead;
pub mod encoding;
pub mod format;
pub mod kdf;
pub mod keys;
pub mod nonce;
pub mod share;
pub mod stream;

pub use aead::{decrypt, encrypt, NONCE_SIZE, TAG_SIZE};
pub use format::{
    chunk_count, encrypted_size, is_encrypted, is_encrypted_file, plaintext_size, ContainerInfo,
    Header, CHUNK_SIZE, ENCRYPTED_CHUNK_SIZE, HEADER_SIZE, MAGIC, VERSION,
};
pub use kdf::{derive_key, derive_key_with, KdfParams};
pub use keys::{Salt, SecretKey, KEY_LENGTH, SALT_LENGTH};
pub use nonce::{derive_nonce, derive_nonce_into};
pub use share::EncryptedKeyMaterial;
pub use stream::{decrypt_bytes, decrypt_stream, encrypt_bytes, encrypt_stream, StreamCipher};
