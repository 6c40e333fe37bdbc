//! The [`ObjectStore`] trait: the raw bucket operations everything else in
//! this crate is built on, plus two implementations — [`S3ObjectStore`]
//! (the real thing) and [`MockObjectStore`] (in-memory, for tests).
//!
//! Splitting this out from [`crate::client::ClientProvider`] mirrors the
//! storage crate's own `StorageBackend` trait / `MockBackend` split: it lets
//! every higher-level module (transfer, read/write channels, directory
//! listing, attribute fetch) stay backend-agnostic and testable without a
//! live bucket.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use bytes::Bytes;
use s3nio_config::IntegrityAlgorithm;
use time::OffsetDateTime;

/// `(last-modified, size, etag)` — the triple spec §3 calls *Attributes*.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectAttributes {
    pub last_modified: OffsetDateTime,
    pub size: u64,
    pub etag: Option<String>,
}
impl ObjectAttributes {
    /// Epoch time, zero size, no etag — the directory sentinel (spec §3, §4.8).
    pub fn directory_sentinel() -> Self {
        Self { last_modified: OffsetDateTime::UNIX_EPOCH, size: 0, etag: None }
    }
}

/// An inclusive byte range to request via the `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end_inclusive: u64,
}
impl ByteRange {
    pub fn to_header(self) -> String {
        format!("bytes={}-{}", self.start, self.end_inclusive)
    }
}

/// Conditions and metadata an [`crate::channel::option::OpenOption`] can attach
/// to a download before it's dispatched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetRequest {
    pub range: Option<ByteRange>,
}

/// Conditions and metadata an [`crate::channel::option::OpenOption`] can attach
/// to an upload before it's dispatched.
#[derive(Debug, Clone, Default)]
pub struct PutRequest {
    pub if_none_match_any: bool,
    pub if_match: Option<String>,
    pub checksum: Option<(IntegrityAlgorithm, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct PutOutcome {
    pub etag: Option<String>,
}

/// One page of a prefix listing: common-prefixes (synthesized subdirectories)
/// ahead of contents (objects), plus a continuation token if truncated.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub common_prefixes: Vec<String>,
    pub contents: Vec<(String, ObjectAttributes)>,
    pub next_continuation_token: Option<String>,
}

/// Raw bucket operations. One instance addresses exactly one bucket (and,
/// for the S3 implementation, one region/endpoint).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn head(&self, key: &str) -> Result<ObjectAttributes>;
    async fn get(&self, key: &str, request: &GetRequest) -> Result<Bytes>;
    async fn put(&self, key: &str, body: Vec<u8>, request: &PutRequest) -> Result<PutOutcome>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn copy(&self, source_key: &str, destination_key: &str) -> Result<()>;
    async fn list(&self, prefix: &str, delimiter: &str, continuation_token: Option<String>) -> Result<ListPage>;
}

#[cfg(feature = "s3")]
mod s3_store {
    use super::*;
    use aws_sdk_s3::Client;
    use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
    use aws_sdk_s3::operation::{
        copy_object::CopyObjectError, delete_object::DeleteObjectError, get_object::GetObjectError,
        head_object::HeadObjectError, list_objects_v2::ListObjectsV2Error, put_object::PutObjectError,
    };
    use aws_sdk_s3::primitives::{ByteStream, DateTime as AwsDateTime};
    use aws_sdk_s3::types::ChecksumAlgorithm;
    use exn::{OptionExt, ResultExt};
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    /// Generous default for concurrent requests against a single bucket client.
    const DEFAULT_CONCURRENT_REQUESTS: usize = 100;

    /// S3-backed [`ObjectStore`]. One instance per (region, endpoint,
    /// credentials) combination; shared across every filesystem that maps
    /// to that combination via [`crate::client::ClientProvider`]'s cache.
    pub struct S3ObjectStore {
        client: Client,
        bucket: String,
        rate_limiter: Arc<Semaphore>,
    }

    impl S3ObjectStore {
        pub fn new(client: Client, bucket: impl Into<String>) -> Self {
            Self { client, bucket: bucket.into(), rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)) }
        }

        pub fn client(&self) -> &Client {
            &self.client
        }

        async fn permit(&self) -> tokio::sync::OwnedSemaphorePermit {
            // unwrap is safe: the semaphore is never closed.
            self.rate_limiter.clone().acquire_owned().await.unwrap()
        }

        fn checksum_algorithm(algo: IntegrityAlgorithm) -> ChecksumAlgorithm {
            match algo {
                IntegrityAlgorithm::Crc32 => ChecksumAlgorithm::Crc32,
                IntegrityAlgorithm::Crc32c => ChecksumAlgorithm::Crc32C,
                IntegrityAlgorithm::Crc64nvme => ChecksumAlgorithm::Crc64Nvme,
            }
        }
    }

    fn parse_datetime(dt: &AwsDateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::Backend("S3 datetime out of range".to_string()))
    }

    fn map_head_error(e: SdkError<HeadObjectError>, key: &str) -> ErrorKind {
        match &e {
            SdkError::ServiceError(s) if matches!(s.err(), HeadObjectError::NotFound(_)) => {
                ErrorKind::NoSuchObject(key.to_string())
            },
            _ if e.code() == Some("Forbidden") || e.code() == Some("AccessDenied") => {
                ErrorKind::AccessDenied(key.to_string())
            },
            _ if e.code() == Some("NoSuchBucket") => ErrorKind::BucketNotFound(key.to_string()),
            _ => transfer_failure("HEAD", key, &e),
        }
    }

    fn map_get_error(e: SdkError<GetObjectError>, key: &str) -> ErrorKind {
        match &e {
            SdkError::ServiceError(s) if matches!(s.err(), GetObjectError::NoSuchKey(_)) => {
                ErrorKind::NoSuchObject(key.to_string())
            },
            _ if e.code() == Some("Forbidden") || e.code() == Some("AccessDenied") => {
                ErrorKind::AccessDenied(key.to_string())
            },
            _ => transfer_failure("GET", key, &e),
        }
    }

    fn map_put_error(e: SdkError<PutObjectError>, key: &str) -> ErrorKind {
        match &e {
            _ if e.code() == Some("PreconditionFailed") => ErrorKind::PreconditionFailed(key.to_string()),
            _ if e.code() == Some("Forbidden") || e.code() == Some("AccessDenied") => {
                ErrorKind::AccessDenied(key.to_string())
            },
            _ => transfer_failure("PUT", key, &e),
        }
    }

    fn map_delete_error(e: SdkError<DeleteObjectError>, key: &str) -> ErrorKind {
        transfer_failure("DELETE", key, &e)
    }

    fn map_copy_error(e: SdkError<CopyObjectError>, key: &str) -> ErrorKind {
        match &e {
            SdkError::ServiceError(s) if s.err().code() == Some("NoSuchKey") => ErrorKind::NoSuchObject(key.to_string()),
            _ => transfer_failure("COPY", key, &e),
        }
    }

    fn map_list_error(e: SdkError<ListObjectsV2Error>, key: &str) -> ErrorKind {
        match &e {
            _ if e.code() == Some("NoSuchBucket") => ErrorKind::BucketNotFound(key.to_string()),
            _ if e.code() == Some("Forbidden") || e.code() == Some("AccessDenied") => {
                ErrorKind::AccessDenied(key.to_string())
            },
            _ => transfer_failure("LIST", key, &e),
        }
    }

    fn transfer_failure<E: ProvideErrorMetadata + std::fmt::Debug>(
        method: &'static str,
        key: &str,
        e: &SdkError<E>,
    ) -> ErrorKind {
        let status = match e {
            SdkError::ServiceError(s) => Some(s.raw().status().as_u16()),
            _ => None,
        };
        ErrorKind::TransferFailure(crate::error::TransferFailure {
            method,
            path: key.to_string(),
            status,
            error_code: e.code().map(str::to_string),
            request_id: e.meta().request_id().map(str::to_string),
            attempts: 1,
        })
    }

    #[async_trait]
    impl ObjectStore for S3ObjectStore {
        async fn head(&self, key: &str) -> Result<ObjectAttributes> {
            let _permit = self.permit().await;
            let response = self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| map_head_error(e, key))?;
            let size = response.content_length.unwrap_or(0).max(0) as u64;
            let last_modified = match &response.last_modified {
                Some(dt) => parse_datetime(dt)?,
                None => OffsetDateTime::UNIX_EPOCH,
            };
            Ok(ObjectAttributes { last_modified, size, etag: response.e_tag })
        }

        async fn get(&self, key: &str, request: &GetRequest) -> Result<Bytes> {
            let _permit = self.permit().await;
            let mut builder = self.client.get_object().bucket(&self.bucket).key(key);
            if let Some(range) = request.range {
                builder = builder.range(range.to_header());
            }
            let response = builder.send().await.map_err(|e| map_get_error(e, key))?;
            let aggregated = response
                .body
                .collect()
                .await
                .or_raise(|| ErrorKind::Backend("failed to read response body".to_string()))?;
            Ok(aggregated.into_bytes())
        }

        async fn put(&self, key: &str, body: Vec<u8>, request: &PutRequest) -> Result<PutOutcome> {
            let _permit = self.permit().await;
            let mut builder = self.client.put_object().bucket(&self.bucket).key(key).body(ByteStream::from(body));
            if request.if_none_match_any {
                builder = builder.if_none_match("*");
            }
            if let Some(etag) = &request.if_match {
                builder = builder.if_match(etag);
            }
            if let Some((algo, _value)) = &request.checksum {
                builder = builder.checksum_algorithm(Self::checksum_algorithm(*algo));
            }
            let response = builder.send().await.map_err(|e| map_put_error(e, key))?;
            Ok(PutOutcome { etag: response.e_tag })
        }

        async fn delete(&self, key: &str) -> Result<()> {
            let _permit = self.permit().await;
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| map_delete_error(e, key))?;
            Ok(())
        }

        async fn copy(&self, source_key: &str, destination_key: &str) -> Result<()> {
            let _permit = self.permit().await;
            let copy_source = format!("{}/{}", self.bucket, source_key);
            self.client
                .copy_object()
                .bucket(&self.bucket)
                .copy_source(copy_source)
                .key(destination_key)
                .send()
                .await
                .map_err(|e| map_copy_error(e, source_key))?;
            Ok(())
        }

        async fn list(&self, prefix: &str, delimiter: &str, continuation_token: Option<String>) -> Result<ListPage> {
            let _permit = self.permit().await;
            let mut builder = self.client.list_objects_v2().bucket(&self.bucket).prefix(prefix).delimiter(delimiter);
            if let Some(token) = continuation_token {
                builder = builder.continuation_token(token);
            }
            let response = builder.send().await.map_err(|e| map_list_error(e, prefix))?;
            let common_prefixes =
                response.common_prefixes().iter().filter_map(|p| p.prefix().map(str::to_string)).collect();
            let mut contents = Vec::new();
            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                let size = object.size.unwrap_or(0).max(0) as u64;
                let last_modified = match &object.last_modified {
                    Some(dt) => parse_datetime(dt)?,
                    None => OffsetDateTime::UNIX_EPOCH,
                };
                contents.push((key.to_string(), ObjectAttributes { last_modified, size, etag: object.e_tag.clone() }));
            }
            let next_continuation_token =
                response.is_truncated.unwrap_or(false).then(|| response.next_continuation_token).flatten();
            Ok(ListPage { common_prefixes, contents, next_continuation_token })
        }
    }
}
#[cfg(feature = "s3")]
pub use s3_store::S3ObjectStore;

#[cfg(any(test, feature = "mock"))]
mod mock_store {
    use super::*;
    use std::collections::HashMap;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::sync::RwLock;

    struct MockObject {
        bytes: Vec<u8>,
        last_modified: OffsetDateTime,
        etag: String,
    }

    /// In-memory [`ObjectStore`], grounded in the storage crate's own
    /// `MockBackend`: a `RwLock`-guarded map, no network, used in tests and
    /// by `mock` feature consumers.
    #[derive(Default)]
    pub struct MockObjectStore {
        objects: RwLock<HashMap<String, MockObject>>,
    }

    impl MockObjectStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds an object directly, bypassing `put`'s conditional checks.
        pub fn seed(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
            let bytes = bytes.into();
            let etag = Self::compute_etag(&bytes);
            self.objects
                .write()
                .unwrap()
                .insert(key.into(), MockObject { bytes, last_modified: OffsetDateTime::UNIX_EPOCH, etag });
        }

        pub fn contains(&self, key: &str) -> bool {
            self.objects.read().unwrap().contains_key(key)
        }

        fn compute_etag(bytes: &[u8]) -> String {
            let mut hasher = DefaultHasher::new();
            bytes.hash(&mut hasher);
            format!("{:016x}", hasher.finish())
        }
    }

    #[async_trait]
    impl ObjectStore for MockObjectStore {
        async fn head(&self, key: &str) -> Result<ObjectAttributes> {
            let guard = self.objects.read().unwrap();
            let object = guard.get(key).ok_or_else(|| exn::Exn::from(ErrorKind::NoSuchObject(key.to_string())))?;
            Ok(ObjectAttributes {
                last_modified: object.last_modified,
                size: object.bytes.len() as u64,
                etag: Some(object.etag.clone()),
            })
        }

        async fn get(&self, key: &str, request: &GetRequest) -> Result<Bytes> {
            let guard = self.objects.read().unwrap();
            let object = guard.get(key).ok_or_else(|| exn::Exn::from(ErrorKind::NoSuchObject(key.to_string())))?;
            let bytes = match request.range {
                Some(range) => {
                    let end = (range.end_inclusive as usize).min(object.bytes.len().saturating_sub(1));
                    let start = (range.start as usize).min(object.bytes.len());
                    if start > end {
                        Vec::new()
                    } else {
                        object.bytes[start..=end].to_vec()
                    }
                },
                None => object.bytes.clone(),
            };
            Ok(Bytes::from(bytes))
        }

        async fn put(&self, key: &str, body: Vec<u8>, request: &PutRequest) -> Result<PutOutcome> {
            let mut guard = self.objects.write().unwrap();
            if request.if_none_match_any && guard.contains_key(key) {
                return Err(exn::Exn::from(ErrorKind::PreconditionFailed(key.to_string())));
            }
            if let Some(expected) = &request.if_match {
                match guard.get(key) {
                    Some(existing) if &existing.etag != expected => {
                        return Err(exn::Exn::from(ErrorKind::PreconditionFailed(key.to_string())));
                    },
                    None => return Err(exn::Exn::from(ErrorKind::PreconditionFailed(key.to_string()))),
                    _ => {},
                }
            }
            let etag = Self::compute_etag(&body);
            guard.insert(key.to_string(), MockObject { bytes: body, last_modified: OffsetDateTime::UNIX_EPOCH, etag: etag.clone() });
            Ok(PutOutcome { etag: Some(etag) })
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.objects.write().unwrap().remove(key);
            Ok(())
        }

        async fn copy(&self, source_key: &str, destination_key: &str) -> Result<()> {
            let mut guard = self.objects.write().unwrap();
            let source = guard.get(source_key).ok_or_else(|| exn::Exn::from(ErrorKind::NoSuchObject(source_key.to_string())))?;
            let copy = MockObject { bytes: source.bytes.clone(), last_modified: source.last_modified, etag: source.etag.clone() };
            guard.insert(destination_key.to_string(), copy);
            Ok(())
        }

        async fn list(&self, prefix: &str, delimiter: &str, continuation_token: Option<String>) -> Result<ListPage> {
            // Single-page mock: every matching key is returned at once. Good
            // enough for exercising `DirectoryStream`'s page-concatenation
            // logic without a live bucket; pagination itself is S3's concern.
            if continuation_token.is_some() {
                return Ok(ListPage::default());
            }
            let guard = self.objects.read().unwrap();
            let mut common_prefixes = std::collections::BTreeSet::new();
            let mut contents = Vec::new();
            for (key, object) in guard.iter() {
                let Some(rest) = key.strip_prefix(prefix) else { continue };
                if !delimiter.is_empty() {
                    if let Some(idx) = rest.find(delimiter) {
                        common_prefixes.insert(format!("{prefix}{}", &rest[..=idx]));
                        continue;
                    }
                }
                contents.push((
                    key.clone(),
                    ObjectAttributes { last_modified: object.last_modified, size: object.bytes.len() as u64, etag: Some(object.etag.clone()) },
                ));
            }
            contents.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(ListPage { common_prefixes: common_prefixes.into_iter().collect(), contents, next_continuation_token: None })
        }
    }
}
#[cfg(any(test, feature = "mock"))]
pub use mock_store::MockObjectStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn head_and_get_round_trip() {
        let store = MockObjectStore::new();
        store.seed("a/b.txt", b"hello world".to_vec());
        let attrs = store.head("a/b.txt").await.unwrap();
        assert_eq!(attrs.size, 11);
        let bytes = store.get("a/b.txt", &GetRequest::default()).await.unwrap();
        assert_eq!(bytes.as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn get_honors_range() {
        let store = MockObjectStore::new();
        store.seed("k", b"ABCDEFGHIJ".to_vec());
        let request = GetRequest { range: Some(ByteRange { start: 2, end_inclusive: 4 }) };
        let bytes = store.get("k", &request).await.unwrap();
        assert_eq!(bytes.as_ref(), b"CDE");
    }

    #[tokio::test]
    async fn head_missing_object_fails_no_such_object() {
        let store = MockObjectStore::new();
        let err = store.head("missing").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NoSuchObject(_)));
    }

    #[tokio::test]
    async fn put_if_none_match_rejects_existing_key() {
        let store = MockObjectStore::new();
        store.seed("k", b"x".to_vec());
        let request = PutRequest { if_none_match_any: true, ..Default::default() };
        let err = store.put("k", b"y".to_vec(), &request).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn put_if_match_rejects_stale_etag() {
        let store = MockObjectStore::new();
        store.seed("k", b"x".to_vec());
        let request = PutRequest { if_match: Some("stale-etag".to_string()), ..Default::default() };
        let err = store.put("k", b"y".to_vec(), &request).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn list_groups_common_prefixes_ahead_of_contents() {
        let store = MockObjectStore::new();
        store.seed("p/a", b"1".to_vec());
        store.seed("p/b", b"2".to_vec());
        store.seed("p/sub/c", b"3".to_vec());
        let page = store.list("p/", "/", None).await.unwrap();
        assert_eq!(page.common_prefixes, vec!["p/sub/".to_string()]);
        let keys: Vec<&str> = page.contents.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["p/a", "p/b"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MockObjectStore::new();
        store.seed("k", b"x".to_vec());
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(!store.contains("k"));
    }

    #[tokio::test]
    async fn copy_duplicates_bytes_under_new_key() {
        let store = MockObjectStore::new();
        store.seed("src", b"payload".to_vec());
        store.copy("src", "dst").await.unwrap();
        let bytes = store.get("dst", &GetRequest::default()).await.unwrap();
        assert_eq!(bytes.as_ref(), b"payload");
    }
}
