//! Streaming encryption for large files.
//!
//! Data is processed in `CHUNK_SIZE` windows, each sealed independently with
//! XChaCha20-Poly1305 under a nonce derived from the header's base nonce and
//! the chunk index. Memory use is one working buffer per call regardless of
//! stream length.
//!
//! Two entry points exist:
//! - the free functions [`encrypt_stream`] / [`decrypt_stream`] run Argon2id
//!   on every call, for one-off operations;
//! - [`StreamCipher`] derives once and reuses the key, for a session that
//!   processes many files.

use std::borrow::Cow;
use std::io::{Read, Seek, SeekFrom, Write};

use chacha20poly1305::XChaCha20Poly1305;
use parking_lot::RwLock;
use tracing::debug;
use zeroize::Zeroizing;

use crate::aead::{cipher_for, open_chunk, seal_chunk, NONCE_SIZE, TAG_SIZE};
use crate::format::{read_full, Header, CHUNK_SIZE, ENCRYPTED_CHUNK_SIZE, HEADER_SIZE};
use crate::kdf::derive_key;
use crate::keys::{Salt, SecretKey};
use crate::nonce::derive_nonce_into;
use nascrypt_common::{Error, Result};

/// Where a cached key came from.
enum KeySource {
    /// Derived from a password under a session salt. The password is kept
    /// so containers written under another salt can still be opened.
    Password {
        password: Zeroizing<Vec<u8>>,
        salt: Salt,
    },
    /// Supplied directly, e.g. the vault data key.
    Raw,
}

struct CachedKey {
    key: SecretKey,
    source: KeySource,
}

impl CachedKey {
    /// Key that opens a container with `header`.
    fn key_for(&self, header: &Header) -> Result<Cow<'_, SecretKey>> {
        match &self.source {
            KeySource::Raw => Ok(Cow::Borrowed(&self.key)),
            KeySource::Password { salt, .. } if *salt == header.salt => {
                Ok(Cow::Borrowed(&self.key))
            }
            KeySource::Password { password, .. } => {
                debug!("container salt differs from session salt, deriving key");
                Ok(Cow::Owned(derive_key(password, &header.salt)?))
            }
        }
    }

    fn header_salt(&self) -> Salt {
        match &self.source {
            KeySource::Password { salt, .. } => *salt,
            // Not used for derivation, but keeps the header field random.
            KeySource::Raw => Salt::generate(),
        }
    }
}

/// Reusable chunked AEAD engine holding one cached key.
///
/// Safe to share between threads: each call owns its buffers and the key is
/// only read. [`StreamCipher::close`] waits for in-flight calls, then wipes
/// the key; the key is also wiped when the cipher is dropped.
pub struct StreamCipher {
    state: RwLock<Option<CachedKey>>,
}

impl StreamCipher {
    /// Derive a key from `password` under a fresh session salt.
    ///
    /// Runs Argon2id once; call once per session, not per file.
    pub fn new(password: &[u8]) -> Result<Self> {
        Self::with_salt(password, Salt::generate())
    }

    /// Derive a key from `password` under a known salt.
    pub fn with_salt(password: &[u8], salt: Salt) -> Result<Self> {
        let key = derive_key(password, &salt)?;
        Ok(Self::cached(
            key,
            KeySource::Password {
                password: Zeroizing::new(password.to_vec()),
                salt,
            },
        ))
    }

    /// Use `key` directly, without any password derivation.
    ///
    /// The header salt of containers written this way is random filler and
    /// is ignored on decryption.
    pub fn from_key(key: SecretKey) -> Self {
        Self::cached(key, KeySource::Raw)
    }

    fn cached(key: SecretKey, source: KeySource) -> Self {
        Self {
            state: RwLock::new(Some(CachedKey { key, source })),
        }
    }

    /// Session salt, for password-derived ciphers.
    ///
    /// # Errors
    /// - `CipherClosed` after [`StreamCipher::close`]
    pub fn salt(&self) -> Result<Option<Salt>> {
        let guard = self.state.read();
        let cached = guard.as_ref().ok_or(Error::CipherClosed)?;
        Ok(match &cached.source {
            KeySource::Password { salt, .. } => Some(*salt),
            KeySource::Raw => None,
        })
    }

    /// True once the key material has been wiped.
    pub fn is_closed(&self) -> bool {
        self.state.read().is_none()
    }

    /// Encrypt `reader` into `writer` as a container.
    ///
    /// Each call uses a fresh random base nonce. Returns the number of
    /// plaintext bytes consumed.
    ///
    /// # Errors
    /// - `CipherClosed` after [`StreamCipher::close`]
    /// - `Io` from the reader or writer
    pub fn encrypt_stream<R: Read, W: Write>(&self, reader: R, writer: W) -> Result<u64> {
        let guard = self.state.read();
        let cached = guard.as_ref().ok_or(Error::CipherClosed)?;

        let header = Header::generate(cached.header_salt());
        seal_chunks(&cached.key, &header, reader, writer)
    }

    /// Decrypt a container from `reader` into `writer`.
    ///
    /// The header is validated before any key work. Each chunk's tag is
    /// verified before its plaintext is written; the first failure aborts.
    /// Returns the number of plaintext bytes written.
    ///
    /// # Errors
    /// - `CipherClosed` after [`StreamCipher::close`]
    /// - `Format` for a bad header
    /// - `Authentication` for a wrong key or tampered chunk
    /// - `Io` from the reader or writer
    pub fn decrypt_stream<R: Read, W: Write>(&self, mut reader: R, writer: W) -> Result<u64> {
        let guard = self.state.read();
        let cached = guard.as_ref().ok_or(Error::CipherClosed)?;

        let header = Header::read_from(&mut reader)?;
        let key = cached.key_for(&header)?;
        open_chunks(&key, &header, reader, writer, ChunkWindow::all())
    }

    /// Decrypt part of a container, starting at plaintext offset `start`.
    ///
    /// Seeks directly to the chunk holding `start`, so earlier chunks are
    /// neither read nor decrypted. At most `max_len` bytes are written when
    /// given. Returns the number of plaintext bytes written.
    pub fn decrypt_range<R: Read + Seek, W: Write>(
        &self,
        mut reader: R,
        writer: W,
        start: u64,
        max_len: Option<u64>,
    ) -> Result<u64> {
        let guard = self.state.read();
        let cached = guard.as_ref().ok_or(Error::CipherClosed)?;

        reader.seek(SeekFrom::Start(0))?;
        let header = Header::read_from(&mut reader)?;
        let key = cached.key_for(&header)?;

        let window = ChunkWindow::from_offset(start, max_len);
        reader.seek(SeekFrom::Start(window.encrypted_offset()))?;
        open_chunks(&key, &header, reader, writer, window)
    }

    /// Encrypt an in-memory buffer.
    pub fn encrypt_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        let capacity = crate::format::encrypted_size(data.len() as u64) as usize;
        let mut output = Vec::with_capacity(capacity);
        self.encrypt_stream(data, &mut output)?;
        Ok(output)
    }

    /// Decrypt an in-memory container.
    pub fn decrypt_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        let capacity = crate::format::plaintext_size(data.len() as u64) as usize;
        let mut output = Vec::with_capacity(capacity);
        self.decrypt_stream(data, &mut output)?;
        Ok(output)
    }

    /// Wipe the cached key material.
    ///
    /// Blocks until in-flight operations on other threads finish. Later
    /// calls fail with `CipherClosed`.
    pub fn close(&self) {
        self.state.write().take();
    }
}

/// Encrypt a stream under a key derived from `password` and a fresh salt.
///
/// Runs Argon2id on every call; use [`StreamCipher`] for repeated work.
pub fn encrypt_stream<R: Read, W: Write>(password: &[u8], reader: R, writer: W) -> Result<u64> {
    let salt = Salt::generate();
    let key = derive_key(password, &salt)?;
    seal_chunks(&key, &Header::generate(salt), reader, writer)
}

/// Decrypt a stream, deriving the key from `password` and the header salt.
pub fn decrypt_stream<R: Read, W: Write>(password: &[u8], mut reader: R, writer: W) -> Result<u64> {
    let header = Header::read_from(&mut reader)?;
    let key = derive_key(password, &header.salt)?;
    open_chunks(&key, &header, reader, writer, ChunkWindow::all())
}

/// Encrypt a complete byte slice with a password.
pub fn encrypt_bytes(password: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    encrypt_stream(password, data, &mut output)?;
    Ok(output)
}

/// Decrypt a complete byte slice with a password.
pub fn decrypt_bytes(password: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    decrypt_stream(password, data, &mut output)?;
    Ok(output)
}

/// Portion of a container's plaintext to emit.
#[derive(Debug, Clone, Copy)]
struct ChunkWindow {
    first_chunk: u64,
    skip: usize,
    limit: Option<u64>,
}

impl ChunkWindow {
    fn all() -> Self {
        Self {
            first_chunk: 0,
            skip: 0,
            limit: None,
        }
    }

    fn from_offset(start: u64, limit: Option<u64>) -> Self {
        Self {
            first_chunk: start / CHUNK_SIZE as u64,
            skip: (start % CHUNK_SIZE as u64) as usize,
            limit,
        }
    }

    fn encrypted_offset(&self) -> u64 {
        HEADER_SIZE as u64 + self.first_chunk.saturating_mul(ENCRYPTED_CHUNK_SIZE as u64)
    }
}

fn next_index(chunk_index: u64) -> Result<u64> {
    chunk_index
        .checked_add(1)
        .ok_or_else(|| Error::Crypto("Chunk counter overflow".to_string()))
}

fn seal_chunks<R: Read, W: Write>(
    key: &SecretKey,
    header: &Header,
    mut reader: R,
    mut writer: W,
) -> Result<u64> {
    let cipher = cipher_for(key);
    header.write_to(&mut writer)?;

    let mut buffer = Zeroizing::new(vec![0u8; CHUNK_SIZE]);
    let mut nonce = [0u8; NONCE_SIZE];
    let mut chunk_index = 0u64;
    let mut total = 0u64;

    loop {
        let n = read_full(&mut reader, &mut buffer)?;
        if n == 0 {
            break;
        }

        derive_nonce_into(&header.base_nonce, chunk_index, &mut nonce);
        let tag = seal_chunk(&cipher, &nonce, &mut buffer[..n])?;
        writer.write_all(&buffer[..n])?;
        writer.write_all(&tag)?;

        total += n as u64;
        chunk_index = next_index(chunk_index)?;

        if n < CHUNK_SIZE {
            break;
        }
    }

    writer.flush()?;
    debug!(bytes = total, chunks = chunk_index, "stream encrypted");
    Ok(total)
}

fn open_chunks<R: Read, W: Write>(
    key: &SecretKey,
    header: &Header,
    mut reader: R,
    mut writer: W,
    window: ChunkWindow,
) -> Result<u64> {
    let cipher: XChaCha20Poly1305 = cipher_for(key);

    let mut buffer = Zeroizing::new(vec![0u8; ENCRYPTED_CHUNK_SIZE]);
    let mut nonce = [0u8; NONCE_SIZE];
    let mut chunk_index = window.first_chunk;
    let mut skip = window.skip;
    let mut remaining = window.limit;
    let mut written = 0u64;

    while remaining != Some(0) {
        let n = read_full(&mut reader, &mut buffer)?;
        if n == 0 {
            break;
        }
        if n < TAG_SIZE {
            return Err(Error::Authentication);
        }

        let (body, tag) = buffer[..n].split_at_mut(n - TAG_SIZE);
        derive_nonce_into(&header.base_nonce, chunk_index, &mut nonce);
        open_chunk(&cipher, &nonce, body, tag)?;

        let mut out: &[u8] = body.get(skip..).unwrap_or(&[]);
        skip = 0;
        if let Some(left) = remaining.as_mut() {
            if (out.len() as u64) > *left {
                out = &out[..*left as usize];
            }
            *left -= out.len() as u64;
        }

        writer.write_all(out)?;
        written += out.len() as u64;
        chunk_index = next_index(chunk_index)?;

        if n < ENCRYPTED_CHUNK_SIZE {
            break;
        }
    }

    writer.flush()?;
    debug!(
        bytes = written,
        chunks = chunk_index - window.first_chunk,
        "stream decrypted"
    );
    Ok(written)
}
