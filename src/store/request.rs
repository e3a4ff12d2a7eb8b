//! Batched requests over a [`CacheStore`].
//!
//! Each call takes a slice of requests and returns one response per request,
//! in request order. The [`RequestOwner`] is checked between requests; once
//! it is canceled the remaining requests report [`Status::Canceled`].

use std::sync::atomic::{AtomicBool, Ordering};

use ddc_policy::{CachePolicy, RecordPolicy};
use ddc_record::{CacheKey, Record, RecordBuilder, Value};
use serde::Serialize;
use tracing::debug;

use super::chunks::{ChunkRequest, ChunkResponse};
use super::{PutStatus, RecordFetch, RecordStore};

/// Outcome of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Ok,
    Error,
    Canceled,
}

/// Cancellation handle shared by the requests of one batch.
#[derive(Debug, Default)]
pub struct RequestOwner {
    canceled: AtomicBool,
}

impl RequestOwner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub struct PutRequest {
    pub name: String,
    pub record: Record,
    pub policy: RecordPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResponse {
    pub name: String,
    pub key: CacheKey,
    pub status: Status,
}

#[derive(Debug, Clone)]
pub struct GetRequest {
    pub name: String,
    pub key: CacheKey,
    pub policy: RecordPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetResponse {
    pub name: String,
    /// The fetched record; a partial fetch has hollow payloads and a miss is
    /// an empty record for the key.
    pub record: Record,
    pub status: Status,
}

#[derive(Debug, Clone)]
pub struct PutValueRequest {
    pub name: String,
    pub key: CacheKey,
    pub value: Value,
    pub policy: CachePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutValueResponse {
    pub name: String,
    pub key: CacheKey,
    pub status: Status,
}

#[derive(Debug, Clone)]
pub struct GetValueRequest {
    pub name: String,
    pub key: CacheKey,
    pub policy: CachePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetValueResponse {
    pub name: String,
    pub key: CacheKey,
    pub value: Option<Value>,
    pub status: Status,
}

/// Batched cache operations.
pub trait CacheStore: Send + Sync {
    fn put(&self, requests: &[PutRequest], owner: &RequestOwner) -> Vec<PutResponse>;

    fn get(&self, requests: &[GetRequest], owner: &RequestOwner) -> Vec<GetResponse>;

    fn put_value(&self, requests: &[PutValueRequest], owner: &RequestOwner) -> Vec<PutValueResponse>;

    fn get_value(&self, requests: &[GetValueRequest], owner: &RequestOwner) -> Vec<GetValueResponse>;

    fn get_chunks(&self, requests: &[ChunkRequest], owner: &RequestOwner) -> Vec<ChunkResponse>;
}

fn put_status(status: PutStatus) -> Status {
    match status {
        PutStatus::Cached => Status::Ok,
        PutStatus::Skipped | PutStatus::NotCached => Status::Error,
    }
}

impl CacheStore for RecordStore {
    fn put(&self, requests: &[PutRequest], owner: &RequestOwner) -> Vec<PutResponse> {
        requests
            .iter()
            .map(|request| {
                let status = if owner.is_canceled() {
                    Status::Canceled
                } else {
                    put_status(self.put_record(&request.name, &request.record, &request.policy, false))
                };
                PutResponse {
                    name: request.name.clone(),
                    key: request.record.key().clone(),
                    status,
                }
            })
            .collect()
    }

    fn get(&self, requests: &[GetRequest], owner: &RequestOwner) -> Vec<GetResponse> {
        requests
            .iter()
            .map(|request| {
                let empty = || RecordBuilder::new(request.key.clone()).build();
                let (record, status) = if owner.is_canceled() {
                    (empty(), Status::Canceled)
                } else {
                    match self.get_record(&request.name, &request.key, &request.policy) {
                        RecordFetch::Hit(record) => (record, Status::Ok),
                        RecordFetch::Partial(record) => (record, Status::Error),
                        RecordFetch::Miss => (empty(), Status::Error),
                    }
                };
                GetResponse {
                    name: request.name.clone(),
                    record,
                    status,
                }
            })
            .collect()
    }

    fn put_value(&self, requests: &[PutValueRequest], owner: &RequestOwner) -> Vec<PutValueResponse> {
        requests
            .iter()
            .map(|request| {
                let status = if owner.is_canceled() {
                    Status::Canceled
                } else {
                    put_status(self.put_cache_value(&request.name, &request.key, &request.value, request.policy))
                };
                PutValueResponse {
                    name: request.name.clone(),
                    key: request.key.clone(),
                    status,
                }
            })
            .collect()
    }

    fn get_value(&self, requests: &[GetValueRequest], owner: &RequestOwner) -> Vec<GetValueResponse> {
        requests
            .iter()
            .map(|request| {
                let (value, status) = if owner.is_canceled() {
                    (None, Status::Canceled)
                } else {
                    match self.get_cache_value(&request.name, &request.key, request.policy) {
                        Some(value) => (Some(value), Status::Ok),
                        None => (None, Status::Error),
                    }
                };
                GetValueResponse {
                    name: request.name.clone(),
                    key: request.key.clone(),
                    value,
                    status,
                }
            })
            .collect()
    }

    fn get_chunks(&self, requests: &[ChunkRequest], owner: &RequestOwner) -> Vec<ChunkResponse> {
        debug!(root = %self.root().display(), requests = requests.len(), "chunk batch");
        self.read_chunks(requests, owner)
    }
}
