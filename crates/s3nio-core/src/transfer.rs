//! Whole-object download/upload via parallel ranged requests (spec §4.3).
//!
//! Downloads fan out ranged `get` calls across a bounded worker pool and
//! reassemble them in order; uploads dispatch through the same
//! [`ObjectStore::put`] every other caller uses, since the in-crate
//! `ObjectStore` seam doesn't expose raw multipart primitives. Both
//! directions are timeout-guarded independently of the store's own
//! per-request timeouts.

use crate::client::store::{ByteRange, GetRequest, ObjectStore, PutOutcome, PutRequest};
use crate::error::{ErrorKind, Result};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// Chunk size for parallel ranged downloads. Matches the read-ahead
/// channel's default fragment size so a download and a sequential read of
/// the same object dispatch comparably sized range requests.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;
/// How many ranged requests a single download may have in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Drives whole-object transfers against one bucket's [`ObjectStore`].
pub struct TransferUtil {
    store: Arc<dyn ObjectStore>,
    chunk_size: u64,
    concurrency: usize,
}

impl TransferUtil {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store, chunk_size: DEFAULT_CHUNK_SIZE, concurrency: DEFAULT_CONCURRENCY }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Downloads `key` in its entirety, dispatching `ceil(size / chunk_size)`
    /// ranged `get` calls up to `concurrency` at a time and reassembling
    /// them in index order. Fails *transfer-timeout* if the whole operation
    /// (all chunks) doesn't complete within `timeout`.
    pub async fn download(&self, key: &str, size: u64, timeout: Duration) -> Result<Bytes> {
        let fetch = self.download_chunks(key, size);
        match tokio::time::timeout(timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(exn::Exn::from(ErrorKind::TransferTimeout(timeout))),
        }
    }

    async fn download_chunks(&self, key: &str, size: u64) -> Result<Bytes> {
        if size == 0 {
            return Ok(Bytes::new());
        }
        let chunk_count = size.div_ceil(self.chunk_size);
        let chunks: Vec<u64> = (0..chunk_count).collect();
        let results = stream::iter(chunks.into_iter().map(|index| {
            let store = self.store.clone();
            let key = key.to_string();
            let chunk_size = self.chunk_size;
            async move {
                let start = index * chunk_size;
                let end_inclusive = ((index + 1) * chunk_size).min(size) - 1;
                let request = GetRequest { range: Some(ByteRange { start, end_inclusive }) };
                store.get(&key, &request).await.map(|bytes| (index, bytes))
            }
        }))
        .buffer_unordered(self.concurrency)
        .collect::<Vec<_>>()
        .await;

        let mut ordered: Vec<Option<Bytes>> = vec![None; results.len()];
        for result in results {
            let (index, bytes) = result?;
            ordered[index as usize] = Some(bytes);
        }
        let mut assembled = Vec::with_capacity(size as usize);
        for chunk in ordered {
            // Every index was dispatched exactly once above, so this is always `Some`.
            assembled.extend_from_slice(&chunk.expect("every chunk index was dispatched"));
        }
        Ok(Bytes::from(assembled))
    }

    /// Uploads `body` under `key`, failing *transfer-timeout* if `put`
    /// doesn't complete within `timeout`. Callers apply
    /// [`crate::channel::option::OpenOptionSet::adapt_put`] to `request`
    /// before calling this.
    pub async fn upload(&self, key: &str, body: Vec<u8>, request: &PutRequest, timeout: Duration) -> Result<PutOutcome> {
        match tokio::time::timeout(timeout, self.store.put(key, body, request)).await {
            Ok(result) => result,
            Err(_) => Err(exn::Exn::from(ErrorKind::TransferTimeout(timeout))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::store::MockObjectStore;

    fn store_with(key: &str, bytes: &[u8]) -> Arc<dyn ObjectStore> {
        let store = Arc::new(MockObjectStore::new());
        store.seed(key, bytes.to_vec());
        store as Arc<dyn ObjectStore>
    }

    #[tokio::test]
    async fn download_reassembles_chunks_in_order() {
        let body: Vec<u8> = (0u8..=255).cycle().take(10_000).collect();
        let store = store_with("obj", &body);
        let transfer = TransferUtil::new(store).with_chunk_size(777).with_concurrency(4);
        let downloaded = transfer.download("obj", body.len() as u64, Duration::from_secs(5)).await.unwrap();
        assert_eq!(downloaded.as_ref(), body.as_slice());
    }

    #[tokio::test]
    async fn download_of_empty_object_is_empty() {
        let store = store_with("empty", b"");
        let transfer = TransferUtil::new(store);
        let downloaded = transfer.download("empty", 0, Duration::from_secs(5)).await.unwrap();
        assert!(downloaded.is_empty());
    }

    #[tokio::test]
    async fn download_of_missing_object_fails() {
        let store = Arc::new(MockObjectStore::new()) as Arc<dyn ObjectStore>;
        let transfer = TransferUtil::new(store);
        let err = transfer.download("missing", 10, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NoSuchObject(_)));
    }

    #[tokio::test]
    async fn upload_round_trips_through_the_store() {
        let store = Arc::new(MockObjectStore::new());
        let transfer = TransferUtil::new(store.clone() as Arc<dyn ObjectStore>);
        let outcome = transfer.upload("k", b"payload".to_vec(), &PutRequest::default(), Duration::from_secs(5)).await.unwrap();
        assert!(outcome.etag.is_some());
        assert!(store.contains("k"));
    }

    #[tokio::test]
    async fn upload_honors_if_none_match_precondition() {
        let store = Arc::new(MockObjectStore::new());
        store.seed("k", b"existing".to_vec());
        let transfer = TransferUtil::new(store as Arc<dyn ObjectStore>);
        let request = PutRequest { if_none_match_any: true, ..Default::default() };
        let err = transfer.upload("k", b"new".to_vec(), &request, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PreconditionFailed(_)));
    }
}
