//! NasCrypt container format.
//!
//! ```text
//! offset 0   magic      "NASC"
//! offset 4   version    0x02
//! offset 5   salt       16 bytes, random per container
//! offset 21  base nonce 24 bytes, random per container
//! offset 45  chunk_0 .. chunk_N, each ciphertext (<= 64 KiB) || tag (16 B)
//! ```
//!
//! Every chunk but the last carries exactly `CHUNK_SIZE` bytes of plaintext.
//! A container holding only the header encodes an empty plaintext.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::aead::{NONCE_SIZE, TAG_SIZE};
use crate::keys::{Salt, SALT_LENGTH};
use nascrypt_common::{Error, Result};

/// Magic bytes identifying a container.
pub const MAGIC: [u8; 4] = *b"NASC";

/// Current container format version.
pub const VERSION: u8 = 0x02;

/// Plaintext bytes per chunk (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Ciphertext bytes of a full chunk, tag included.
pub const ENCRYPTED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_SIZE;

/// Header size: magic (4) + version (1) + salt (16) + base nonce (24).
pub const HEADER_SIZE: usize = MAGIC.len() + 1 + SALT_LENGTH + NONCE_SIZE;

const SALT_OFFSET: usize = MAGIC.len() + 1;
const NONCE_OFFSET: usize = SALT_OFFSET + SALT_LENGTH;

/// Parsed container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Format version byte.
    pub version: u8,
    /// Salt the stream key was derived with.
    pub salt: Salt,
    /// Nonce of chunk 0; later chunks derive from it.
    pub base_nonce: [u8; NONCE_SIZE],
}

impl Header {
    /// Create a current-version header with a fresh random base nonce.
    pub fn generate(salt: Salt) -> Self {
        use rand::RngCore;

        let mut base_nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut base_nonce);
        Self {
            version: VERSION,
            salt,
            base_nonce,
        }
    }

    /// Encode to the fixed wire layout.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..MAGIC.len()].copy_from_slice(&MAGIC);
        bytes[MAGIC.len()] = self.version;
        bytes[SALT_OFFSET..NONCE_OFFSET].copy_from_slice(self.salt.as_bytes());
        bytes[NONCE_OFFSET..].copy_from_slice(&self.base_nonce);
        bytes
    }

    /// Decode and validate a header.
    ///
    /// # Errors
    /// - `Format` if the magic bytes or version are not recognized
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        if bytes[..MAGIC.len()] != MAGIC {
            return Err(Error::Format("Invalid NasCrypt magic bytes".to_string()));
        }

        let version = bytes[MAGIC.len()];
        if version != VERSION {
            return Err(Error::Format(format!(
                "Unsupported NasCrypt version: got 0x{:02x}, expected 0x{:02x}",
                version, VERSION
            )));
        }

        let salt = Salt::from_slice(&bytes[SALT_OFFSET..NONCE_OFFSET])?;
        let mut base_nonce = [0u8; NONCE_SIZE];
        base_nonce.copy_from_slice(&bytes[NONCE_OFFSET..]);

        Ok(Self {
            version,
            salt,
            base_nonce,
        })
    }

    /// Read and validate a header from the start of a stream.
    ///
    /// # Errors
    /// - `Format` for a foreign magic, unknown version or a stream that ends
    ///   before `HEADER_SIZE` bytes
    /// - `Io` for reader failures
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = [0u8; HEADER_SIZE];
        let n = read_full(reader, &mut bytes)?;

        if n >= MAGIC.len() && bytes[..MAGIC.len()] != MAGIC {
            return Err(Error::Format("Invalid NasCrypt magic bytes".to_string()));
        }
        if n < HEADER_SIZE {
            return Err(Error::Format(format!(
                "Truncated header: {} of {} bytes",
                n, HEADER_SIZE
            )));
        }

        Self::parse(&bytes)
    }

    /// Write the encoded header.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }
}

/// Read until `buffer` is full or the reader is exhausted.
///
/// Returns the number of bytes read; fewer than `buffer.len()` means EOF.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buffer: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buffer.len() {
        match reader.read(&mut buffer[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(total)
}

/// Number of chunks in a container of `encrypted_size` bytes.
///
/// A trailing partial chunk counts as one.
pub fn chunk_count(encrypted_size: u64) -> u64 {
    let data = encrypted_size.saturating_sub(HEADER_SIZE as u64);
    data.div_ceil(ENCRYPTED_CHUNK_SIZE as u64)
}

/// Plaintext length of a container of `encrypted_size` bytes.
pub fn plaintext_size(encrypted_size: u64) -> u64 {
    let data = encrypted_size.saturating_sub(HEADER_SIZE as u64);
    let full = data / ENCRYPTED_CHUNK_SIZE as u64;
    let remainder = data % ENCRYPTED_CHUNK_SIZE as u64;

    full * CHUNK_SIZE as u64 + remainder.saturating_sub(TAG_SIZE as u64)
}

/// Container length produced for `plaintext_len` bytes of input.
pub fn encrypted_size(plaintext_len: u64) -> u64 {
    let full = plaintext_len / CHUNK_SIZE as u64;
    let remainder = plaintext_len % CHUNK_SIZE as u64;
    let tail = if remainder > 0 {
        remainder + TAG_SIZE as u64
    } else {
        0
    };

    HEADER_SIZE as u64 + full * ENCRYPTED_CHUNK_SIZE as u64 + tail
}

/// Check whether a stream starts with the container magic.
///
/// Consumes up to four bytes. Short inputs and read errors report `false`.
pub fn is_encrypted<R: Read>(mut reader: R) -> bool {
    let mut magic = [0u8; MAGIC.len()];
    matches!(read_full(&mut reader, &mut magic), Ok(n) if n == MAGIC.len() && magic == MAGIC)
}

/// Check whether the file at `path` is a container.
pub fn is_encrypted_file(path: impl AsRef<Path>) -> Result<bool> {
    let file = File::open(path)?;
    Ok(is_encrypted(file))
}

/// Summary of a container, read without any key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Header parsed and magic/version recognized.
    pub is_valid: bool,
    /// Parsed header, when valid.
    pub header: Option<Header>,
    /// Total container length.
    pub encrypted_size: u64,
    /// Number of chunks after the header.
    pub chunk_count: u64,
    /// Plaintext length implied by the container length.
    pub plaintext_size: u64,
}

impl ContainerInfo {
    /// Inspect a seekable container.
    ///
    /// Foreign data is not an error: it yields `is_valid == false`. The
    /// reader is left positioned just after the header.
    pub fn inspect<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let encrypted_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let header = match Header::read_from(reader) {
            Ok(header) => Some(header),
            Err(Error::Format(_)) => None,
            Err(e) => return Err(e),
        };

        Ok(Self {
            is_valid: header.is_some(),
            header,
            encrypted_size,
            chunk_count: chunk_count(encrypted_size),
            plaintext_size: plaintext_size(encrypted_size),
        })
    }
}
