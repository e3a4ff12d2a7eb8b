//! Self-describing compressed buffers.
//!
//! Layout: `magic(4) | method(1) | raw_size(u64 LE) | raw_hash(32) | body`.
//! The header carries the hash and size of the uncompressed bytes so a
//! buffer can be identified without decompressing it.

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{RecordError, RecordResult};
use crate::hash::ContentHash;

const MAGIC: [u8; 4] = *b"DDCZ";
const HEADER_SIZE: usize = 4 + 1 + 8 + ContentHash::SIZE;

/// How the body of a buffer is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Raw bytes stored as-is.
    Stored,
    /// Raw deflate stream.
    Deflate,
}

impl CompressionMethod {
    fn to_byte(self) -> u8 {
        match self {
            Self::Stored => 0,
            Self::Deflate => 1,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Stored),
            1 => Some(Self::Deflate),
            _ => None,
        }
    }
}

/// Immutable compressed bytes with a header describing the raw content.
///
/// Cloning is cheap; the bytes are shared.
#[derive(Clone, PartialEq, Eq)]
pub struct CompressedBuffer {
    bytes: Arc<[u8]>,
}

impl CompressedBuffer {
    /// Compress `raw`, keeping whichever of deflate and stored is smaller.
    pub fn compress(raw: &[u8]) -> Self {
        let deflated = deflate(raw);
        let (method, body) = match deflated {
            Some(body) if body.len() < raw.len() => (CompressionMethod::Deflate, body),
            _ => (CompressionMethod::Stored, raw.to_vec()),
        };

        let mut bytes = Vec::with_capacity(HEADER_SIZE + body.len());
        bytes.extend_from_slice(&MAGIC);
        bytes.push(method.to_byte());
        bytes.extend_from_slice(&(raw.len() as u64).to_le_bytes());
        bytes.extend_from_slice(ContentHash::of(raw).as_bytes());
        bytes.extend_from_slice(&body);
        Self { bytes: bytes.into() }
    }

    /// Wrap bytes previously produced by [`CompressedBuffer::as_bytes`].
    ///
    /// Only the header is validated; the body is checked on decompression.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> RecordResult<Self> {
        let bytes: Vec<u8> = bytes.into();
        if bytes.len() < HEADER_SIZE {
            return Err(RecordError::CorruptBuffer(format!(
                "{} bytes is smaller than the {HEADER_SIZE} byte header",
                bytes.len()
            )));
        }
        if bytes[..4] != MAGIC {
            return Err(RecordError::CorruptBuffer("bad magic".to_string()));
        }
        let method = CompressionMethod::from_byte(bytes[4])
            .ok_or_else(|| RecordError::CorruptBuffer(format!("unknown method {}", bytes[4])))?;

        let buffer = Self { bytes: bytes.into() };
        if method == CompressionMethod::Stored
            && (buffer.bytes.len() - HEADER_SIZE) as u64 != buffer.raw_size()
        {
            return Err(RecordError::CorruptBuffer(
                "stored body length does not match raw size".to_string(),
            ));
        }
        Ok(buffer)
    }

    pub fn method(&self) -> CompressionMethod {
        // Validated at construction.
        CompressionMethod::from_byte(self.bytes[4]).unwrap_or(CompressionMethod::Stored)
    }

    pub fn raw_size(&self) -> u64 {
        let mut size = [0u8; 8];
        size.copy_from_slice(&self.bytes[5..13]);
        u64::from_le_bytes(size)
    }

    pub fn raw_hash(&self) -> ContentHash {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&self.bytes[13..HEADER_SIZE]);
        ContentHash::from_bytes(hash)
    }

    /// Total encoded size, header included.
    pub fn compressed_size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decompress and verify the raw size and hash.
    pub fn decompress(&self) -> RecordResult<Vec<u8>> {
        let body = &self.bytes[HEADER_SIZE..];
        let raw = match self.method() {
            CompressionMethod::Stored => body.to_vec(),
            CompressionMethod::Deflate => {
                let mut raw = Vec::with_capacity(self.raw_size().min(64 << 20) as usize);
                DeflateDecoder::new(body)
                    .take(self.raw_size().saturating_add(1))
                    .read_to_end(&mut raw)?;
                raw
            }
        };

        if raw.len() as u64 != self.raw_size() {
            return Err(RecordError::CorruptBuffer(format!(
                "decompressed {} bytes, expected {}",
                raw.len(),
                self.raw_size()
            )));
        }
        let actual = ContentHash::of(&raw);
        if actual != self.raw_hash() {
            return Err(RecordError::CorruptBuffer(format!(
                "raw hash mismatch: expected {}, got {actual}",
                self.raw_hash()
            )));
        }
        Ok(raw)
    }
}

fn deflate(raw: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw).ok()?;
    encoder.finish().ok()
}

impl fmt::Debug for CompressedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedBuffer")
            .field("method", &self.method())
            .field("raw_size", &self.raw_size())
            .field("raw_hash", &self.raw_hash())
            .field("compressed_size", &self.compressed_size())
            .finish()
    }
}
