//! DDC Store - disk-backed, content-addressed build artifact cache
//!
//! Records and values are stored as hash-verified packages under a sharded
//! directory tree. Large payloads spill into a shared content store, a
//! startup speed test decides how aggressively the store is used, and a
//! background janitor evicts files that have not been touched recently.

pub mod access_log;
pub mod atomic;
pub mod config;
pub mod debug;
pub mod error;
pub mod fs;
pub mod inventory;
pub mod janitor;
pub mod paths;
pub mod speed;
pub mod store;

pub use config::{load_layers, StoreParams};
pub use debug::DebugOptions;
pub use error::{StoreError, StoreResult};
pub use fs::{FileSystem, LocalFileSystem, MemoryFileSystem};
pub use inventory::Inventory;
pub use janitor::{Janitor, JanitorParams, ScanSummary};
pub use speed::{SpeedClass, SpeedStats};
pub use store::{
    CacheStore, ChunkRequest, ChunkResponse, GetRequest, GetResponse, GetValueRequest, GetValueResponse,
    PutRequest, PutResponse, PutStatus, PutValueRequest, PutValueResponse, RecordFetch, RecordStore,
    RequestOwner, Status,
};

pub use ddc_policy::{CachePolicy, RecordPolicy, RecordPolicyBuilder};
pub use ddc_record::{Bucket, CacheKey, ContentHash, Payload, Record, RecordBuilder, Value, ValueId};
