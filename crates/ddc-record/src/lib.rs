//! Cache record model for ddc-store.
//!
//! Defines the immutable values that flow through the cache:
//! - `CacheKey`: a bucket name plus a 256-bit content hash
//! - `Payload`: one named value of a record, possibly hollow (no bytes)
//! - `Record`: optional metadata, a primary value and attachments
//! - `Package`: the binary framing a record is saved to and loaded from

pub mod compressed;
pub mod error;
pub mod hash;
pub mod key;
pub mod package;
pub mod record;
pub mod value;

pub use compressed::{CompressedBuffer, CompressionMethod};
pub use error::{RecordError, RecordResult};
pub use hash::ContentHash;
pub use key::{Bucket, CacheKey, ValueId, MAX_BUCKET_LEN};
pub use package::Package;
pub use record::{Record, RecordBuilder};
pub use value::{Payload, Value};
