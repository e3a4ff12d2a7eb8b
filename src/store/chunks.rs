//! Ranged reads of payload bytes.

use ddc_policy::{CachePolicy, RecordPolicyBuilder};
use ddc_record::{CacheKey, CompressedBuffer, ContentHash, Record, Value, ValueId};
use tracing::{debug, info};

use super::request::{RequestOwner, Status};
use super::RecordStore;

/// A request for `[raw_offset, raw_offset + raw_size)` of one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub name: String,
    pub key: CacheKey,
    /// Payload within the record; [`ValueId::NULL`] reads the value stored
    /// with [`RecordStore::put_cache_value`].
    pub id: ValueId,
    pub raw_offset: u64,
    /// Bytes to read; `u64::MAX` reads to the end.
    pub raw_size: u64,
    /// `SkipData` checks existence without reading bytes.
    pub policy: CachePolicy,
}

impl ChunkRequest {
    /// Request the whole payload.
    pub fn whole(name: impl Into<String>, key: CacheKey, id: ValueId, policy: CachePolicy) -> Self {
        Self {
            name: name.into(),
            key,
            id,
            raw_offset: 0,
            raw_size: u64::MAX,
            policy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkResponse {
    pub name: String,
    pub key: CacheKey,
    pub id: ValueId,
    pub raw_offset: u64,
    /// Bytes actually covered, after clamping to the payload size.
    pub raw_size: u64,
    pub raw_hash: ContentHash,
    pub data: Option<Vec<u8>>,
    pub status: Status,
}

impl ChunkResponse {
    fn failed(request: &ChunkRequest, status: Status) -> Self {
        Self {
            name: request.name.clone(),
            key: request.key.clone(),
            id: request.id,
            raw_offset: request.raw_offset,
            raw_size: 0,
            raw_hash: ContentHash::ZERO,
            data: None,
            status,
        }
    }
}

/// The payload the previous request resolved, reused by following requests
/// for the same key and id.
struct ChunkSource {
    key: CacheKey,
    id: ValueId,
    value: Value,
    exists: bool,
    data: Option<CompressedBuffer>,
    decoded: Option<Vec<u8>>,
}

impl ChunkSource {
    fn serves(&self, request: &ChunkRequest, exists_only: bool) -> bool {
        self.key == request.key && self.id == request.id && (exists_only || self.data.is_some())
    }

    fn decoded(&mut self) -> Option<&[u8]> {
        if self.decoded.is_none() {
            self.decoded = self.data.as_ref()?.decompress().ok();
        }
        self.decoded.as_deref()
    }
}

impl RecordStore {
    /// Serve chunk requests. Requests are processed in key and id order so
    /// consecutive requests share one record load; responses come back in
    /// request order.
    pub(super) fn read_chunks(&self, requests: &[ChunkRequest], owner: &RequestOwner) -> Vec<ChunkResponse> {
        let mut order: Vec<usize> = (0..requests.len()).collect();
        order.sort_by(|&a, &b| (&requests[a].key, requests[a].id).cmp(&(&requests[b].key, requests[b].id)));

        let mut responses: Vec<Option<ChunkResponse>> = vec![None; requests.len()];
        let mut source: Option<ChunkSource> = None;
        let mut record: Option<Record> = None;

        for index in order {
            let request = &requests[index];
            if owner.is_canceled() {
                responses[index] = Some(ChunkResponse::failed(request, Status::Canceled));
                continue;
            }

            let exists_only = request.policy.contains(CachePolicy::SKIP_DATA);
            if !source.as_ref().is_some_and(|source| source.serves(request, exists_only)) {
                source = if request.id.is_null() {
                    self.load_value(&request.name, &request.key, request.policy)
                        .map(|value| self.chunk_source(request, value))
                } else {
                    if !record.as_ref().is_some_and(|record| record.key() == &request.key) {
                        let mut policy = RecordPolicyBuilder::new(CachePolicy::NONE);
                        let value_policy = request.policy & CachePolicy::VALUE_MASK;
                        let added = policy.add_value_policy(request.id, value_policy).is_ok();
                        record = if added {
                            self.load_record(&request.name, &request.key, &policy.build())
                        } else {
                            None
                        };
                    }
                    record
                        .as_ref()
                        .and_then(|record| record.find_payload(request.id))
                        .map(|payload| self.chunk_source(request, payload.value().clone()))
                };
            }

            responses[index] = Some(match source.as_mut().filter(|source| source.exists) {
                Some(source) => self.respond(request, source, exists_only),
                None => ChunkResponse::failed(request, Status::Error),
            });
        }

        responses.into_iter().flatten().collect()
    }

    fn chunk_source(&self, request: &ChunkRequest, value: Value) -> ChunkSource {
        let mut source = ChunkSource {
            key: request.key.clone(),
            id: request.id,
            exists: false,
            data: None,
            decoded: None,
            value: value.remove_data(),
        };
        if !request.policy.intersects(CachePolicy::QUERY) {
            return source;
        }

        let skip_data = request.policy.contains(CachePolicy::SKIP_DATA);
        if let Some(data) = value.data() {
            source.exists = true;
            if !skip_data {
                source.data = Some(data.clone());
            }
            return source;
        }

        let raw_hash = value.raw_hash();
        let path = self.content_file(&raw_hash);
        if skip_data {
            source.exists = self.files.file_exists(&path);
        } else if let Some(content) = self.load_content(&path, &request.name) {
            if content.raw_hash() == raw_hash {
                source.exists = true;
                source.data = Some(content);
            } else {
                info!(root = %self.root().display(), name = %request.name, key = %request.key, value = %request.id, %raw_hash, "cache miss with corrupted value");
            }
        }
        if source.exists {
            self.log_content_access(&raw_hash, &path);
        } else {
            debug!(root = %self.root().display(), name = %request.name, key = %request.key, value = %request.id, %raw_hash, "cache miss with missing value");
        }
        source
    }

    fn respond(&self, request: &ChunkRequest, source: &mut ChunkSource, exists_only: bool) -> ChunkResponse {
        let total = source.value.raw_size();
        let offset = request.raw_offset.min(total);
        let size = request.raw_size.min(total - offset);
        let mut response = ChunkResponse {
            name: request.name.clone(),
            key: request.key.clone(),
            id: request.id,
            raw_offset: request.raw_offset,
            raw_size: size,
            raw_hash: source.value.raw_hash(),
            data: None,
            status: Status::Ok,
        };
        if exists_only {
            return response;
        }

        let chunk = source.decoded().and_then(|raw| {
            let start = usize::try_from(offset).ok()?;
            let end = usize::try_from(offset + size).ok()?;
            raw.get(start..end).map(<[u8]>::to_vec)
        });
        match chunk {
            Some(bytes) => {
                debug!(root = %self.root().display(), name = %request.name, key = %request.key, value = %request.id, "cache hit");
                response.data = Some(bytes);
            }
            None => {
                info!(root = %self.root().display(), name = %request.name, key = %request.key, value = %request.id, "chunk could not be decoded");
                response.status = Status::Error;
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{key, memory_store, quiet_params, record_with};
    use super::super::CacheStore;
    use super::*;
    use crate::config::StoreParams;
    use ddc_policy::RecordPolicy;

    fn chunk(key: &CacheKey, id: ValueId, offset: u64, size: u64, policy: CachePolicy) -> ChunkRequest {
        ChunkRequest {
            name: "chunk".to_string(),
            key: key.clone(),
            id,
            raw_offset: offset,
            raw_size: size,
            policy,
        }
    }

    #[test]
    fn test_ranges_are_clamped_and_sliced() {
        let (_fs, store) = memory_store(quiet_params());
        let key = key("Chunks", "slice");
        let id = ValueId::from_name("v");
        store.put_record("t", &record_with(&key, &[("v", b"0123456789")]), &RecordPolicy::default(), false);

        let requests = vec![
            chunk(&key, id, 2, 3, CachePolicy::DEFAULT),
            chunk(&key, id, 8, 100, CachePolicy::DEFAULT),
            chunk(&key, id, 50, 4, CachePolicy::DEFAULT),
        ];
        let responses = store.get_chunks(&requests, &RequestOwner::new());

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].data.as_deref(), Some(&b"234"[..]));
        assert_eq!(responses[1].data.as_deref(), Some(&b"89"[..]));
        assert_eq!(responses[1].raw_size, 2);
        assert_eq!(responses[2].raw_size, 0);
        assert_eq!(responses[2].data.as_deref(), Some(&b""[..]));
        assert!(responses.iter().all(|response| response.status == Status::Ok));
    }

    #[test]
    fn test_responses_follow_request_order_across_keys() {
        let (_fs, store) = memory_store(quiet_params());
        let a = key("Chunks", "a");
        let b = key("Chunks", "b");
        let id = ValueId::from_name("v");
        store.put_record("t", &record_with(&a, &[("v", b"aaaa")]), &RecordPolicy::default(), false);
        store.put_record("t", &record_with(&b, &[("v", b"bbbb")]), &RecordPolicy::default(), false);

        let requests = vec![
            chunk(&b, id, 0, 1, CachePolicy::DEFAULT),
            chunk(&a, id, 0, 1, CachePolicy::DEFAULT),
            chunk(&b, id, 1, 2, CachePolicy::DEFAULT),
        ];
        let responses = store.get_chunks(&requests, &RequestOwner::new());
        let keys: Vec<&CacheKey> = responses.iter().map(|response| &response.key).collect();
        assert_eq!(keys, vec![&b, &a, &b]);
        assert_eq!(responses[0].data.as_deref(), Some(&b"b"[..]));
        assert_eq!(responses[1].data.as_deref(), Some(&b"a"[..]));
        assert_eq!(responses[2].data.as_deref(), Some(&b"bb"[..]));
    }

    #[test]
    fn test_exists_only_reads_no_bytes() {
        let params = StoreParams {
            max_value_size_kb: 1,
            ..quiet_params()
        };
        let (_fs, store) = memory_store(params);
        let key = key("Chunks", "exists");
        let raw: Vec<u8> = {
            use rand::{Rng, SeedableRng};
            let mut rng = rand::rngs::StdRng::seed_from_u64(11);
            (0..8192).map(|_| rng.gen()).collect()
        };
        store.put_cache_value("t", &key, &Value::from_raw(&raw), CachePolicy::DEFAULT);

        let requests = vec![chunk(&key, ValueId::NULL, 0, u64::MAX, CachePolicy::DEFAULT | CachePolicy::SKIP_DATA)];
        let responses = store.get_chunks(&requests, &RequestOwner::new());
        assert_eq!(responses[0].status, Status::Ok);
        assert_eq!(responses[0].raw_size, raw.len() as u64);
        assert_eq!(responses[0].raw_hash, ContentHash::of(&raw));
        assert!(responses[0].data.is_none());

        let requests = vec![chunk(&key, ValueId::NULL, 4096, 16, CachePolicy::DEFAULT)];
        let responses = store.get_chunks(&requests, &RequestOwner::new());
        assert_eq!(responses[0].data.as_deref(), Some(&raw[4096..4112]));
    }

    #[test]
    fn test_missing_payload_is_an_error() {
        let (_fs, store) = memory_store(quiet_params());
        let key = key("Chunks", "missing");
        store.put_record("t", &record_with(&key, &[("v", b"x")]), &RecordPolicy::default(), false);

        let requests = vec![
            chunk(&key, ValueId::from_name("other"), 0, 1, CachePolicy::DEFAULT),
            chunk(&super::super::tests::key("Chunks", "absent"), ValueId::NULL, 0, 1, CachePolicy::DEFAULT),
        ];
        let responses = store.get_chunks(&requests, &RequestOwner::new());
        assert!(responses.iter().all(|response| response.status == Status::Error));
    }

    #[test]
    fn test_canceled_owner_skips_requests() {
        let (_fs, store) = memory_store(quiet_params());
        let key = key("Chunks", "cancel");
        let owner = RequestOwner::new();
        owner.cancel();
        let responses = store.get_chunks(&[chunk(&key, ValueId::NULL, 0, 1, CachePolicy::DEFAULT)], &owner);
        assert_eq!(responses[0].status, Status::Canceled);
    }
}
