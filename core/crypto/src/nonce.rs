//! Per-chunk nonce derivation.
//!
//! Chunk `i` of a container is sealed under the base nonce from the header
//! with its first eight bytes XORed with `i` in little-endian order. Index 0
//! therefore uses the base nonce unchanged, and every index reachable by a
//! `u64` counter maps to a distinct nonce.

use crate::aead::NONCE_SIZE;

/// Derive the nonce for `chunk_index`, returning it by value.
pub fn derive_nonce(base_nonce: &[u8; NONCE_SIZE], chunk_index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    derive_nonce_into(base_nonce, chunk_index, &mut nonce);
    nonce
}

/// Derive the nonce for `chunk_index` into a caller-owned buffer.
///
/// Used on the per-chunk hot path; produces exactly the bytes of
/// [`derive_nonce`].
#[inline]
pub fn derive_nonce_into(
    base_nonce: &[u8; NONCE_SIZE],
    chunk_index: u64,
    out: &mut [u8; NONCE_SIZE],
) {
    out.copy_from_slice(base_nonce);
    for (byte, index_byte) in out.iter_mut().zip(chunk_index.to_le_bytes()) {
        *byte ^= index_byte;
    }
}
