//! Binary package framing.
//!
//! A package is a JSON object followed by the compressed buffers it
//! references, keyed by the raw hash of each buffer:
//!
//! ```text
//! magic "DDCP" | version u8 | object_len u32 LE | object (JSON)
//! attachment_count u32 LE | { raw_hash [32] | len u64 LE | buffer }*
//! ```
//!
//! Loading is bounded: every length is checked against the remaining input
//! before it is used, so arbitrary bytes produce an error rather than a
//! panic or an oversized allocation.

use std::collections::BTreeMap;

use crate::compressed::CompressedBuffer;
use crate::error::{RecordError, RecordResult};
use crate::hash::ContentHash;

const MAGIC: [u8; 4] = *b"DDCP";
const VERSION: u8 = 1;
const ATTACHMENT_HEADER_SIZE: usize = ContentHash::SIZE + 8;

/// A structured object plus its attachments.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    object: serde_json::Value,
    attachments: BTreeMap<ContentHash, CompressedBuffer>,
}

impl Package {
    pub fn new(object: serde_json::Value) -> Self {
        Self {
            object,
            attachments: BTreeMap::new(),
        }
    }

    pub fn object(&self) -> &serde_json::Value {
        &self.object
    }

    pub fn attachments(&self) -> &BTreeMap<ContentHash, CompressedBuffer> {
        &self.attachments
    }

    pub fn find_attachment(&self, raw_hash: &ContentHash) -> Option<&CompressedBuffer> {
        self.attachments.get(raw_hash)
    }

    /// Attach a buffer. Attaching the same content twice keeps one copy.
    pub fn add_attachment(&mut self, buffer: CompressedBuffer) {
        self.attachments.insert(buffer.raw_hash(), buffer);
    }

    pub fn remove_attachment(&mut self, raw_hash: &ContentHash) -> Option<CompressedBuffer> {
        self.attachments.remove(raw_hash)
    }

    /// Combined compressed size of all attachments.
    pub fn attachments_size(&self) -> u64 {
        self.attachments
            .values()
            .map(CompressedBuffer::compressed_size)
            .sum()
    }

    /// Encode the package.
    pub fn save(&self) -> RecordResult<Vec<u8>> {
        let object = serde_json::to_vec(&self.object)?;
        let object_len = u32::try_from(object.len())
            .map_err(|_| RecordError::MalformedPackage("object exceeds 4 GiB".to_string()))?;

        let mut out = Vec::with_capacity(
            object.len() + self.attachments_size() as usize + 64 * (self.attachments.len() + 1),
        );
        out.extend_from_slice(&MAGIC);
        out.push(VERSION);
        out.extend_from_slice(&object_len.to_le_bytes());
        out.extend_from_slice(&object);
        out.extend_from_slice(&(self.attachments.len() as u32).to_le_bytes());
        for (raw_hash, buffer) in &self.attachments {
            out.extend_from_slice(raw_hash.as_bytes());
            out.extend_from_slice(&buffer.compressed_size().to_le_bytes());
            out.extend_from_slice(buffer.as_bytes());
        }
        Ok(out)
    }

    /// Decode and validate a package.
    pub fn try_load(bytes: &[u8]) -> RecordResult<Self> {
        let mut reader = Reader { bytes, pos: 0 };

        if reader.take(4)? != MAGIC {
            return Err(malformed("bad magic"));
        }
        let version = reader.take(1)?[0];
        if version != VERSION {
            return Err(malformed(&format!("unsupported version {version}")));
        }

        let object_len = reader.read_u32()? as usize;
        let object: serde_json::Value = serde_json::from_slice(reader.take(object_len)?)?;
        if !object.is_object() {
            return Err(malformed("root is not an object"));
        }

        let count = reader.read_u32()? as usize;
        if count > reader.remaining() / ATTACHMENT_HEADER_SIZE {
            return Err(malformed(&format!("attachment count {count} exceeds input")));
        }

        let mut attachments = BTreeMap::new();
        for _ in 0..count {
            let raw_hash = ContentHash::from_slice(reader.take(ContentHash::SIZE)?)
                .ok_or_else(|| malformed("short attachment hash"))?;
            let len = usize::try_from(reader.read_u64()?)
                .map_err(|_| malformed("attachment length overflow"))?;
            let buffer = CompressedBuffer::from_bytes(reader.take(len)?)?;
            if buffer.raw_hash() != raw_hash {
                return Err(malformed(&format!(
                    "attachment {raw_hash} carries buffer for {}",
                    buffer.raw_hash()
                )));
            }
            if attachments.insert(raw_hash, buffer).is_some() {
                return Err(malformed(&format!("duplicate attachment {raw_hash}")));
            }
        }

        if reader.remaining() != 0 {
            return Err(malformed("trailing bytes after attachments"));
        }
        Ok(Self {
            object,
            attachments,
        })
    }
}

fn malformed(reason: &str) -> RecordError {
    RecordError::MalformedPackage(reason.to_string())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize) -> RecordResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(malformed(&format!(
                "needed {len} bytes at offset {}, {} remain",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u32(&mut self) -> RecordResult<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> RecordResult<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }
}
