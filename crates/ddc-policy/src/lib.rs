//! Cache policy flags for ddc-store.
//!
//! A [`CachePolicy`] says whether a request may query or store, locally or
//! remotely, and which parts of a record it may skip. A [`RecordPolicy`]
//! pairs a default policy with per-value overrides.

mod error;
mod flags;
mod record;
mod text;

pub use error::{PolicyError, PolicyResult};
pub use flags::CachePolicy;
pub use record::{RecordPolicy, RecordPolicyBuilder, ValuePolicy};
