//! Cache records.

use serde::{Deserialize, Serialize};

use crate::error::{RecordError, RecordResult};
use crate::hash::ContentHash;
use crate::key::{CacheKey, ValueId};
use crate::package::Package;
use crate::value::{Payload, Value};

/// The cacheable unit: optional metadata, one primary value and zero or more
/// attachments. Built with [`RecordBuilder`]; immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    key: CacheKey,
    meta: Option<serde_json::Value>,
    value: Option<Payload>,
    attachments: Vec<Payload>,
}

impl Record {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn meta(&self) -> Option<&serde_json::Value> {
        self.meta.as_ref()
    }

    pub fn value(&self) -> Option<&Payload> {
        self.value.as_ref()
    }

    pub fn attachments(&self) -> &[Payload] {
        &self.attachments
    }

    /// The primary value followed by the attachments.
    pub fn payloads(&self) -> impl Iterator<Item = &Payload> {
        self.value.iter().chain(self.attachments.iter())
    }

    pub fn payload_count(&self) -> usize {
        self.value.iter().count() + self.attachments.len()
    }

    pub fn find_payload(&self, id: ValueId) -> Option<&Payload> {
        self.payloads().find(|payload| payload.id() == id)
    }

    /// Save to a package. Every payload carrying bytes becomes an attachment.
    pub fn save(&self) -> RecordResult<Package> {
        let object = RecordObject {
            key: self.key.clone(),
            meta: self.meta.clone(),
            value: self.value.as_ref().map(PayloadObject::from),
            attachments: self.attachments.iter().map(PayloadObject::from).collect(),
        };
        let mut package = Package::new(serde_json::to_value(object)?);
        for payload in self.payloads() {
            if let Some(data) = payload.data() {
                package.add_attachment(data.clone());
            }
        }
        Ok(package)
    }

    /// Load from a package. Payloads whose bytes are not attached come back
    /// hollow.
    pub fn load(package: &Package) -> RecordResult<Self> {
        let object: RecordObject = serde_json::from_value(package.object().clone())?;
        let resolve = |entry: PayloadObject| -> RecordResult<Payload> {
            let payload = Payload::new(entry.id, Value::hollow(entry.raw_hash, entry.raw_size));
            match package.find_attachment(&entry.raw_hash) {
                Some(data) => payload.with_data(data.clone()),
                None => Ok(payload),
            }
        };

        let mut builder = RecordBuilder::new(object.key);
        if let Some(meta) = object.meta {
            builder.set_meta(meta);
        }
        if let Some(value) = object.value {
            builder.set_value(resolve(value)?)?;
        }
        for attachment in object.attachments {
            builder.add_attachment(resolve(attachment)?)?;
        }
        Ok(builder.build())
    }
}

/// Builder for [`Record`].
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    key: CacheKey,
    meta: Option<serde_json::Value>,
    value: Option<Payload>,
    attachments: Vec<Payload>,
}

impl RecordBuilder {
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            meta: None,
            value: None,
            attachments: Vec::new(),
        }
    }

    pub fn set_meta(&mut self, meta: serde_json::Value) -> &mut Self {
        self.meta = Some(meta);
        self
    }

    /// Set the primary value. Fails if another payload already uses its id.
    pub fn set_value(&mut self, payload: Payload) -> RecordResult<&mut Self> {
        self.value = None;
        self.check_unique(payload.id())?;
        self.value = Some(payload);
        Ok(self)
    }

    /// Add an attachment. Fails if another payload already uses its id.
    pub fn add_attachment(&mut self, payload: Payload) -> RecordResult<&mut Self> {
        self.check_unique(payload.id())?;
        self.attachments.push(payload);
        Ok(self)
    }

    fn check_unique(&self, id: ValueId) -> RecordResult<()> {
        let taken = self.value.iter().chain(self.attachments.iter()).any(|p| p.id() == id);
        if taken {
            return Err(RecordError::MalformedPackage(format!(
                "duplicate value id {id} in record {}",
                self.key
            )));
        }
        Ok(())
    }

    /// Finish the record. Attachments are ordered by id.
    pub fn build(mut self) -> Record {
        self.attachments.sort_by_key(Payload::id);
        Record {
            key: self.key,
            meta: self.meta,
            value: self.value,
            attachments: self.attachments,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RecordObject {
    key: CacheKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<PayloadObject>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<PayloadObject>,
}

#[derive(Serialize, Deserialize)]
struct PayloadObject {
    id: ValueId,
    raw_hash: ContentHash,
    raw_size: u64,
}

impl From<&Payload> for PayloadObject {
    fn from(payload: &Payload) -> Self {
        Self {
            id: payload.id(),
            raw_hash: payload.raw_hash(),
            raw_size: payload.raw_size(),
        }
    }
}
