//! The filesystem: a bucket's owned state (client, temp dir, open-channel
//! registry) plus the registry that maps fs-keys to filesystems (spec §3,
//! §5, §6).
//!
//! Replaces the source's global filesystem-cache singleton (see the
//! redesign notes on global singletons) with one explicit, owned
//! [`FilesystemRegistry`] instance — no static mutable defaults.

use crate::channel::seekable::SeekableChannel;
use crate::client::{ClientProvider, ClientSpec, ObjectStore};
use crate::error::{ErrorKind, Result};
use crate::path::Path;
use dashmap::DashMap;
use s3nio_config::S3NioConfig;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tempfile::TempDir;

/// A filesystem is owned by its `Arc`; every [`Path`] and [`SeekableChannel`]
/// holds a clone of the handle rather than a bare reference.
pub type FilesystemHandle = Arc<Filesystem>;

/// One bucket's worth of state: its fs-key, the resolved client spec, a
/// process-unique temporary directory for staging files, and the set of
/// channels currently open against it.
pub struct Filesystem {
    fs_key: String,
    bucket: String,
    spec: ClientSpec,
    config: S3NioConfig,
    client_provider: Arc<ClientProvider>,
    temp_dir: TempDir,
    channels: DashMap<u64, Weak<SeekableChannel>>,
    next_channel_id: AtomicU64,
    closed: AtomicBool,
}

impl Filesystem {
    fn new(
        fs_key: String,
        bucket: String,
        spec: ClientSpec,
        config: S3NioConfig,
        client_provider: Arc<ClientProvider>,
    ) -> Result<Self> {
        let temp_dir = tempfile::Builder::new().prefix("s3nio-").tempdir().map_err(ErrorKind::from)?;
        Ok(Self {
            fs_key,
            bucket,
            spec,
            config,
            client_provider,
            temp_dir,
            channels: DashMap::new(),
            next_channel_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// `(endpoint || "") + "/" + bucket`, stable for the filesystem's lifetime.
    pub fn fs_key(&self) -> &str {
        &self.fs_key
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn config(&self) -> &S3NioConfig {
        &self.config
    }

    /// Root of this filesystem's staging-file sub-tree.
    pub fn temp_dir(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves (and caches, via [`ClientProvider`]) the object store for
    /// this filesystem's bucket/region/endpoint combination.
    pub async fn store(&self) -> Result<Arc<dyn ObjectStore>> {
        if self.is_closed() {
            return Err(ErrorKind::ClosedChannel.into());
        }
        let handle = self.client_provider.client_for(&self.fs_key, &self.bucket, &self.spec, &self.config).await?;
        Ok(handle.store().clone())
    }

    /// Opens a seekable channel over `path` and registers it in this
    /// filesystem's open-channel set, so [`Self::close`] will close it too.
    pub async fn open_channel(
        self: &Arc<Self>,
        path: &Path,
        spec: crate::channel::seekable::OpenSpec,
    ) -> Result<Arc<SeekableChannel>> {
        if self.is_closed() {
            return Err(ErrorKind::ClosedChannel.into());
        }
        let store = self.store().await?;
        let channel =
            Arc::new(SeekableChannel::open(store, path.object_key().to_string(), self.temp_dir(), spec).await?);
        let id = self.register_channel(&channel);
        channel.set_registration(self.clone(), id).await;
        Ok(channel)
    }

    pub(crate) fn register_channel(&self, channel: &Arc<SeekableChannel>) -> u64 {
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        self.channels.insert(id, Arc::downgrade(channel));
        id
    }

    pub(crate) fn deregister_channel(&self, id: u64) {
        self.channels.remove(&id);
    }

    /// Closes every still-registered channel, then marks the filesystem
    /// closed. Not re-openable under this fs-key while still open; closing
    /// an already-closed filesystem is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let ids: Vec<u64> = self.channels.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, weak)) = self.channels.remove(&id)
                && let Some(channel) = weak.upgrade()
            {
                channel.close().await?;
            }
        }
        Ok(())
    }

    /// §9 open question: `checkAccess` ignores WRITE/EXECUTE in the source.
    /// Codified here as: only existence is checked; a WRITE/EXECUTE query
    /// succeeds iff the object is readable. Directory-inferred paths always
    /// succeed without a network call.
    pub async fn check_access(&self, path: &Path) -> Result<()> {
        if path.is_directory() {
            return Ok(());
        }
        self.store().await?.head(path.object_key()).await.map(|_| ())
    }

    /// §9 open question: the object API never reports prior existence, so
    /// this always returns [`DeleteOutcome::Deleted`]; a caller wanting true
    /// prior-existence must call [`Self::check_access`] first.
    pub async fn delete_if_exists(&self, path: &Path) -> Result<DeleteOutcome> {
        self.store().await?.delete(path.object_key()).await?;
        Ok(DeleteOutcome::Deleted)
    }

    /// Single-shot server-side copy, no delete. The bulk copy/move/delete
    /// orchestration layer above this core is expected to build a `rename`
    /// out of this plus a subsequent delete, the way the teacher's
    /// `S3Backend::rename` does.
    pub async fn copy_object(&self, source: &Path, destination: &Path) -> Result<()> {
        self.store().await?.copy(source.object_key(), destination.object_key()).await
    }

    /// Builds a filesystem backed by an in-memory [`crate::client::store::MockObjectStore`],
    /// bypassing region discovery and client construction. Used throughout
    /// this crate's own test suite.
    #[cfg(test)]
    pub fn for_test(bucket: &str) -> FilesystemHandle {
        Self::for_test_with_store(bucket, Arc::new(crate::client::store::MockObjectStore::new()))
    }

    /// As [`Self::for_test`], but registers a caller-supplied store so the
    /// test can seed objects and inspect them afterward.
    #[cfg(test)]
    pub fn for_test_with_store(bucket: &str, store: Arc<crate::client::store::MockObjectStore>) -> FilesystemHandle {
        let fs_key = format!("/{bucket}");
        let provider = Arc::new(ClientProvider::new("us-east-1"));
        provider.register_mock(&fs_key, store as Arc<dyn ObjectStore>);
        Arc::new(
            Self::new(fs_key, bucket.to_string(), ClientSpec::default(), S3NioConfig::default(), provider)
                .expect("failed to create temp dir for test filesystem"),
        )
    }
}

/// §9 open question: `deleteIfExists` has no way to report prior existence,
/// so it's codified as always succeeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
}

/// Maps fs-keys to [`Filesystem`] instances, creating one lazily on first
/// resolution and reusing it on every subsequent resolution of the same
/// key until it's closed.
pub struct FilesystemRegistry {
    provider: Arc<ClientProvider>,
    filesystems: DashMap<String, FilesystemHandle>,
}

impl FilesystemRegistry {
    pub fn new(default_region: impl Into<String>) -> Self {
        Self { provider: Arc::new(ClientProvider::new(default_region)), filesystems: DashMap::new() }
    }

    /// Parses `uri`, looks up (or lazily creates) the filesystem for its
    /// fs-key, and resolves the remaining key against it.
    pub fn resolve(&self, uri: &str, config: S3NioConfig) -> Result<(FilesystemHandle, Path)> {
        let parsed = crate::path::uri::parse(uri)?;
        let fs_key = format!("{}/{}", parsed.endpoint.as_deref().unwrap_or(""), parsed.bucket);
        if let Some(existing) = self.filesystems.get(&fs_key)
            && !existing.is_closed()
        {
            let fs = existing.clone();
            drop(existing);
            let path = Path::parse(fs.clone(), &parsed.key)?;
            return Ok((fs, path));
        }
        let spec = Self::spec_from(&parsed, &config);
        let fresh =
            Arc::new(Filesystem::new(fs_key.clone(), parsed.bucket.clone(), spec, config, self.provider.clone())?);
        self.filesystems.insert(fs_key, fresh.clone());
        let path = Path::parse(fresh.clone(), &parsed.key)?;
        Ok((fresh, path))
    }

    fn spec_from(parsed: &crate::path::uri::ParsedUri, config: &S3NioConfig) -> ClientSpec {
        ClientSpec {
            endpoint: parsed.endpoint.clone(),
            protocol: config.endpoint_protocol,
            access_key_id: parsed.credentials.as_ref().map(|(access, _)| access.clone()).or_else(|| config.access_key_id.clone()),
            secret_access_key: parsed
                .credentials
                .as_ref()
                .map(|(_, secret)| secret.clone())
                .or_else(|| config.secret_access_key.clone()),
            region: config.region.clone(),
        }
    }

    pub fn get(&self, fs_key: &str) -> Option<FilesystemHandle> {
        self.filesystems.get(fs_key).map(|entry| entry.clone())
    }
}
