//! Values and payloads.

use serde::{Deserialize, Serialize};

use crate::compressed::CompressedBuffer;
use crate::error::{RecordError, RecordResult};
use crate::hash::ContentHash;
use crate::key::ValueId;
use crate::package::Package;

/// A blob identified by the hash and size of its raw bytes.
///
/// A value is "hollow" when the hash and size are known but the bytes are
/// not present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    raw_hash: ContentHash,
    raw_size: u64,
    data: Option<CompressedBuffer>,
}

impl Value {
    /// Compress raw bytes into a value.
    pub fn from_raw(raw: &[u8]) -> Self {
        Self::from_compressed(CompressedBuffer::compress(raw))
    }

    pub fn from_compressed(data: CompressedBuffer) -> Self {
        Self {
            raw_hash: data.raw_hash(),
            raw_size: data.raw_size(),
            data: Some(data),
        }
    }

    pub fn hollow(raw_hash: ContentHash, raw_size: u64) -> Self {
        Self {
            raw_hash,
            raw_size,
            data: None,
        }
    }

    pub fn raw_hash(&self) -> ContentHash {
        self.raw_hash
    }

    pub fn raw_size(&self) -> u64 {
        self.raw_size
    }

    pub fn data(&self) -> Option<&CompressedBuffer> {
        self.data.as_ref()
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Copy of this value without its bytes.
    pub fn remove_data(&self) -> Self {
        Self::hollow(self.raw_hash, self.raw_size)
    }

    /// Copy of this value carrying `data`, which must describe the same bytes.
    pub fn with_data(&self, data: CompressedBuffer) -> RecordResult<Self> {
        if data.raw_hash() != self.raw_hash || data.raw_size() != self.raw_size {
            return Err(RecordError::CorruptBuffer(format!(
                "buffer {} does not match value {}",
                data.raw_hash(),
                self.raw_hash
            )));
        }
        Ok(Self::from_compressed(data))
    }

    /// Save as a single-value package.
    ///
    /// The bytes are attached when present; a hollow value saves only its
    /// hash and size.
    pub fn save_package(&self) -> RecordResult<Package> {
        let object = ValueObject {
            raw_hash: self.raw_hash,
            raw_size: self.raw_size,
        };
        let mut package = Package::new(serde_json::to_value(object)?);
        if let Some(data) = &self.data {
            package.add_attachment(data.clone());
        }
        Ok(package)
    }

    /// Load from a single-value package. The result is hollow when the bytes
    /// were stored outside the package.
    pub fn load_package(package: &Package) -> RecordResult<Self> {
        let object: ValueObject = serde_json::from_value(package.object().clone())?;
        let value = Self::hollow(object.raw_hash, object.raw_size);
        match package.find_attachment(&object.raw_hash) {
            Some(data) => value.with_data(data.clone()),
            None => Ok(value),
        }
    }
}

/// A value with its identifier inside a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    id: ValueId,
    value: Value,
}

impl Payload {
    pub fn new(id: ValueId, value: Value) -> Self {
        Self { id, value }
    }

    pub fn id(&self) -> ValueId {
        self.id
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn raw_hash(&self) -> ContentHash {
        self.value.raw_hash
    }

    pub fn raw_size(&self) -> u64 {
        self.value.raw_size
    }

    pub fn data(&self) -> Option<&CompressedBuffer> {
        self.value.data()
    }

    pub fn has_data(&self) -> bool {
        self.value.has_data()
    }

    pub fn remove_data(&self) -> Self {
        Self::new(self.id, self.value.remove_data())
    }

    pub fn with_data(&self, data: CompressedBuffer) -> RecordResult<Self> {
        Ok(Self::new(self.id, self.value.with_data(data)?))
    }
}

#[derive(Serialize, Deserialize)]
struct ValueObject {
    raw_hash: ContentHash,
    raw_size: u64,
}
