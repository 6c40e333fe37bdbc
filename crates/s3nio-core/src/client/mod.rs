//! Bucket → regional client resolution (spec §4.2).
//!
//! Replaces the source's global client-store singleton and two-layer
//! `s3`/`s3x` provider inheritance (see the redesign notes) with one owned
//! registry: a bounded bucket-region cache, a bounded client cache with
//! explicit closed-detection, and a single process-wide discovery client.

pub mod store;

pub use store::{ByteRange, GetRequest, ListPage, ObjectAttributes, ObjectStore, PutOutcome, PutRequest};

use crate::error::{ErrorKind, Result};
use moka::sync::Cache;
use s3nio_config::{EndpointProtocol, S3NioConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const REGION_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
const REGION_CACHE_CAPACITY: u64 = 1024;
const CLIENT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
const CLIENT_CACHE_CAPACITY: u64 = 256;

/// Endpoint/credentials the caller wants a client built against. `endpoint`
/// being `Some` is the `s3x://` fast path (skips region discovery entirely);
/// `None` is canonical `s3://`, which goes through region discovery.
#[derive(Debug, Clone, Default)]
pub struct ClientSpec {
    pub endpoint: Option<String>,
    pub protocol: EndpointProtocol,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: Option<String>,
}

/// `(fs-key → client-handle, created-at)` from spec §3's *ClientCache entry*.
/// The handle exposes an *is-closed* flag so the provider can evict and
/// rebuild lazily instead of ever handing out a closed client.
#[derive(Clone)]
pub struct ClientHandle {
    store: Arc<dyn ObjectStore>,
    closed: Arc<AtomicBool>,
}
impl ClientHandle {
    fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store, closed: Arc::new(AtomicBool::new(false)) }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Resolves, caches, and rebuilds bucket clients. One instance is shared
/// process-wide by the filesystem registry.
pub struct ClientProvider {
    region_cache: Cache<String, String>,
    client_cache: Cache<String, ClientHandle>,
    default_region: String,
    #[cfg(feature = "s3")]
    universal: std::sync::OnceLock<aws_sdk_s3::Client>,
}

impl ClientProvider {
    /// `default_region` anchors both the universal discovery client and the
    /// fallback used by `get-bucket-location` when it reports the
    /// unqualified (pre-regions) `us-east-1` constraint.
    pub fn new(default_region: impl Into<String>) -> Self {
        Self {
            region_cache: Cache::builder().max_capacity(REGION_CACHE_CAPACITY).time_to_live(REGION_CACHE_TTL).build(),
            client_cache: Cache::builder().max_capacity(CLIENT_CACHE_CAPACITY).time_to_live(CLIENT_CACHE_TTL).build(),
            default_region: default_region.into(),
            #[cfg(feature = "s3")]
            universal: std::sync::OnceLock::new(),
        }
    }

    /// Returns a live client for `bucket`, building and caching one under
    /// `fs_key` if absent or if the cached entry reports closed.
    pub async fn client_for(
        &self,
        fs_key: &str,
        bucket: &str,
        spec: &ClientSpec,
        config: &S3NioConfig,
    ) -> Result<ClientHandle> {
        if let Some(handle) = self.client_cache.get(fs_key) {
            if !handle.is_closed() {
                return Ok(handle);
            }
            self.client_cache.invalidate(fs_key);
        }
        let handle = self.build_client(bucket, spec, config).await?;
        self.client_cache.insert(fs_key.to_string(), handle.clone());
        Ok(handle)
    }

    /// Test-only escape hatch: registers a pre-built store (typically a
    /// [`store::MockObjectStore`]) directly under `fs_key`, bypassing
    /// discovery and client construction entirely.
    #[cfg(any(test, feature = "mock"))]
    pub fn register_mock(&self, fs_key: &str, store: Arc<dyn ObjectStore>) {
        self.client_cache.insert(fs_key.to_string(), ClientHandle::new(store));
    }

    #[cfg(feature = "s3")]
    async fn build_client(&self, bucket: &str, spec: &ClientSpec, config: &S3NioConfig) -> Result<ClientHandle> {
        use aws_sdk_s3::Client;
        use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region, retry::RetryConfig};

        let region = match &spec.endpoint {
            // Custom endpoint: skip region discovery entirely (spec §4.2.1).
            Some(_) => spec.region.clone().unwrap_or_else(|| self.default_region.clone()),
            None => match &spec.region {
                Some(region) => region.clone(),
                None => self.discover_region(bucket, discovery_timeout(config)).await?,
            },
        };

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            .force_path_style(spec.endpoint.is_some());
        if let (Some(access_key_id), Some(secret_access_key)) = (&spec.access_key_id, &spec.secret_access_key) {
            builder = builder
                .credentials_provider(Credentials::new(access_key_id, secret_access_key, None, None, "s3nio-config"));
        }
        if let Some(endpoint) = &spec.endpoint {
            let scheme = match spec.protocol {
                EndpointProtocol::Https => "https",
                EndpointProtocol::Http => "http",
            };
            builder = builder.endpoint_url(format!("{scheme}://{endpoint}"));
        }
        let client = Client::from_conf(builder.build());
        let store: Arc<dyn ObjectStore> = Arc::new(store::S3ObjectStore::new(client, bucket));
        Ok(ClientHandle::new(store))
    }

    #[cfg(not(feature = "s3"))]
    async fn build_client(&self, _bucket: &str, _spec: &ClientSpec, _config: &S3NioConfig) -> Result<ClientHandle> {
        Err(exn::Exn::from(ErrorKind::Unsupported("no object-store backend compiled in".to_string())))
    }

    #[cfg(feature = "s3")]
    fn universal_client(&self) -> &aws_sdk_s3::Client {
        self.universal.get_or_init(|| {
            use aws_sdk_s3::Client;
            use aws_sdk_s3::config::{BehaviorVersion, Region, retry::RetryConfig};
            let config = aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .region(Region::new(self.default_region.clone()))
                .retry_config(RetryConfig::standard().with_max_attempts(4))
                .build();
            Client::from_conf(config)
        })
    }

    /// Implements spec §4.2's algorithm step 2: head-bucket against the
    /// universal client, falling back to the redirect header on 301 and to
    /// `get-bucket-location` on 403.
    #[cfg(feature = "s3")]
    async fn discover_region(&self, bucket: &str, timeout: Duration) -> Result<String> {
        if let Some(region) = self.region_cache.get(bucket) {
            return Ok(region);
        }
        use aws_sdk_s3::error::SdkError;

        let attempt =
            tokio::time::timeout(timeout, self.universal_client().head_bucket().bucket(bucket).send()).await;
        let outcome = attempt.map_err(|_| exn::Exn::from(ErrorKind::BucketDiscoveryTimeout(timeout)))?;
        let region = match outcome {
            Ok(_) => self.default_region.clone(),
            Err(SdkError::ServiceError(ref service_error)) if service_error.raw().status().as_u16() == 301 => {
                service_error
                    .raw()
                    .headers()
                    .get("x-amz-bucket-region")
                    .map(str::to_string)
                    .ok_or_else(|| exn::Exn::from(ErrorKind::Backend("301 redirect missing bucket-region header".to_string())))?
            },
            Err(SdkError::ServiceError(ref service_error)) if service_error.raw().status().as_u16() == 403 => {
                self.discover_region_via_location(bucket, timeout).await?
            },
            Err(e) => return Err(exn::Exn::from(ErrorKind::Backend(e.to_string()))),
        };
        self.region_cache.insert(bucket.to_string(), region.clone());
        Ok(region)
    }

    #[cfg(feature = "s3")]
    async fn discover_region_via_location(&self, bucket: &str, timeout: Duration) -> Result<String> {
        let call = tokio::time::timeout(timeout, self.universal_client().get_bucket_location().bucket(bucket).send());
        let output = call
            .await
            .map_err(|_| exn::Exn::from(ErrorKind::BucketDiscoveryTimeout(timeout)))?
            .map_err(|e| exn::Exn::from(ErrorKind::Backend(e.to_string())))?;
        Ok(region_from_location_constraint(output.location_constraint()))
    }
}

#[cfg(feature = "s3")]
fn region_from_location_constraint(constraint: Option<&aws_sdk_s3::types::BucketLocationConstraint>) -> String {
    match constraint {
        // An empty/unset constraint is S3's historical way of saying "us-east-1".
        None => "us-east-1".to_string(),
        Some(region) => region.as_str().to_string(),
    }
}

fn discovery_timeout(config: &S3NioConfig) -> Duration {
    config.timeout_low
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::store::MockObjectStore;

    #[tokio::test]
    async fn registered_mock_is_returned_without_discovery() {
        let provider = ClientProvider::new("us-east-1");
        let store = Arc::new(MockObjectStore::new());
        store.seed("k", b"v".to_vec());
        provider.register_mock("/my-bucket", store.clone() as Arc<dyn ObjectStore>);
        let handle = provider
            .client_for("/my-bucket", "my-bucket", &ClientSpec::default(), &S3NioConfig::default())
            .await
            .unwrap();
        assert!(!handle.is_closed());
        let attrs = handle.store().head("k").await.unwrap();
        assert_eq!(attrs.size, 1);
    }

    #[tokio::test]
    async fn closed_handle_is_evicted_and_rebuilt() {
        let provider = ClientProvider::new("us-east-1");
        let store = Arc::new(MockObjectStore::new());
        provider.register_mock("/fs", store as Arc<dyn ObjectStore>);
        let first = provider.client_for("/fs", "bucket", &ClientSpec::default(), &S3NioConfig::default()).await.unwrap();
        first.close();
        assert!(provider.client_cache.get("/fs").unwrap().is_closed());
        // Re-registering under the same key simulates a fresh build after
        // the provider notices the cached handle is closed.
        let replacement = Arc::new(MockObjectStore::new());
        provider.register_mock("/fs", replacement as Arc<dyn ObjectStore>);
        let second = provider.client_for("/fs", "bucket", &ClientSpec::default(), &S3NioConfig::default()).await.unwrap();
        assert!(!second.is_closed());
    }
}
