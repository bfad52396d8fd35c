//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, AeadInPlace, KeyInit, OsRng},
    Tag, XChaCha20Poly1305,
};

use crate::keys::SecretKey;
use nascrypt_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Build the cipher instance for a key.
pub(crate) fn cipher_for(key: &SecretKey) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()))
}

/// Encrypt plaintext using XChaCha20-Poly1305.
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated
/// - The output length is plaintext length + NONCE_SIZE + TAG_SIZE
///
/// # Errors
/// - Returns error if encryption fails
pub fn encrypt(key: &SecretKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key);
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    // Prepend nonce to ciphertext
    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt ciphertext produced by [`encrypt`].
///
/// # Preconditions
/// - Ciphertext format: nonce || encrypted_data || tag
///
/// # Errors
/// - `Format` if the input is shorter than NONCE_SIZE + TAG_SIZE
/// - `Authentication` if the tag does not verify (wrong key or tampered data)
pub fn decrypt(key: &SecretKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Format("Ciphertext too short".to_string()));
    }

    let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_SIZE);
    let nonce = GenericArray::from_slice(nonce_bytes);

    cipher_for(key)
        .decrypt(nonce, encrypted)
        .map_err(|_| Error::Authentication)
}

/// Encrypt plaintext with a caller-supplied nonce.
///
/// # Warning
/// Using the same nonce twice with the same key completely breaks security.
/// Returns ciphertext || tag without the nonce.
pub fn encrypt_with_nonce(
    key: &SecretKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    cipher_for(key)
        .encrypt(GenericArray::from_slice(nonce), plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))
}

/// Decrypt ciphertext || tag with a caller-supplied nonce.
pub fn decrypt_with_nonce(
    key: &SecretKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::Format("Ciphertext too short".to_string()));
    }

    cipher_for(key)
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Authentication)
}

/// Encrypt one chunk in place and return its detached tag.
pub(crate) fn seal_chunk(
    cipher: &XChaCha20Poly1305,
    nonce: &[u8; NONCE_SIZE],
    buffer: &mut [u8],
) -> Result<[u8; TAG_SIZE]> {
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), b"", buffer)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut out = [0u8; TAG_SIZE];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Verify and decrypt one chunk in place.
///
/// The tag is checked before any keystream is applied, so on failure the
/// buffer still holds ciphertext.
pub(crate) fn open_chunk(
    cipher: &XChaCha20Poly1305,
    nonce: &[u8; NONCE_SIZE],
    buffer: &mut [u8],
    tag: &[u8],
) -> Result<()> {
    if tag.len() != TAG_SIZE {
        return Err(Error::Authentication);
    }

    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            b"",
            buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| Error::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;

    fn key(byte: u8) -> SecretKey {
        SecretKey::from_bytes([byte; KEY_LENGTH])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = key(42);
        let plaintext = b"Hello, World!";

        let ciphertext = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &ciphertext).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_ciphertext_size() {
        let key = key(42);
        let plaintext = b"Test message";

        let ciphertext = encrypt(&key, plaintext).unwrap();

        assert_eq!(ciphertext.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_different_nonce_each_time() {
        let key = key(42);
        let plaintext = b"Same plaintext";

        let ct1 = encrypt(&key, plaintext).unwrap();
        let ct2 = encrypt(&key, plaintext).unwrap();

        assert_ne!(&ct1[..NONCE_SIZE], &ct2[..NONCE_SIZE]);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn test_wrong_key_is_authentication_error() {
        let ciphertext = encrypt(&key(1), b"Secret data").unwrap();
        let result = decrypt(&key(2), &ciphertext);

        assert!(matches!(result, Err(Error::Authentication)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = key(42);
        let mut ciphertext = encrypt(&key, b"Important data").unwrap();
        ciphertext[NONCE_SIZE + 5] ^= 0xFF;

        assert!(matches!(decrypt(&key, &ciphertext), Err(Error::Authentication)));
    }

    #[test]
    fn test_short_ciphertext_is_format_error() {
        let result = decrypt(&key(42), &[0u8; NONCE_SIZE + TAG_SIZE - 1]);
        assert!(matches!(result, Err(Error::Format(_))));
    }

    #[test]
    fn test_encrypt_with_nonce() {
        let key = key(42);
        let nonce = [1u8; NONCE_SIZE];
        let plaintext = b"Deterministic";

        let ct1 = encrypt_with_nonce(&key, &nonce, plaintext).unwrap();
        let ct2 = encrypt_with_nonce(&key, &nonce, plaintext).unwrap();
        assert_eq!(ct1, ct2);

        let decrypted = decrypt_with_nonce(&key, &nonce, &ct1).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_chunk_seal_matches_combined_mode() {
        let key = key(7);
        let nonce = [3u8; NONCE_SIZE];
        let plaintext = b"chunk body".to_vec();

        let mut buffer = plaintext.clone();
        let tag = seal_chunk(&cipher_for(&key), &nonce, &mut buffer).unwrap();
        buffer.extend_from_slice(&tag);

        let combined = encrypt_with_nonce(&key, &nonce, &plaintext).unwrap();
        assert_eq!(buffer, combined);
    }

    #[test]
    fn test_open_chunk_leaves_ciphertext_on_failure() {
        let key = key(7);
        let nonce = [3u8; NONCE_SIZE];
        let cipher = cipher_for(&key);

        let mut buffer = b"do not leak".to_vec();
        let mut tag = seal_chunk(&cipher, &nonce, &mut buffer).unwrap();
        let sealed = buffer.clone();
        tag[0] ^= 1;

        let result = open_chunk(&cipher, &nonce, &mut buffer, &tag);
        assert!(matches!(result, Err(Error::Authentication)));
        assert_eq!(buffer, sealed);
    }

    #[test]
    fn test_empty_plaintext() {
        let key = key(42);
        let ciphertext = encrypt(&key, b"").unwrap();
        let decrypted = decrypt(&key, &ciphertext).unwrap();

        assert!(decrypted.is_empty());
    }
}
