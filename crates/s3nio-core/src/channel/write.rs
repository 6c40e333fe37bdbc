//! Local-staging writable channel (spec §4.5).
//!
//! Writes land in a per-channel temp file; `close`/`force` flush that file's
//! current contents to the object store in one `put`. There is no partial
//! upload: every write before the next flush point is staged locally first,
//! mirroring the source's "buffer then flush" transfer-manager fallback but
//! applying it unconditionally rather than only above a size threshold.

use crate::channel::option::OpenOptionSet;
use crate::client::store::{GetRequest, ObjectStore, PutRequest};
use crate::error::{ErrorKind, Result};
use crate::transfer::TransferUtil;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// Default timeout for the close-time upload, matching the default used by
/// the transfer utility's own `upload` operation.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// A write-only channel over one object key, buffering through a local
/// staging file until [`Self::close`] or [`Self::force`] flushes it.
pub struct WritableChannel {
    key: String,
    transfer: TransferUtil,
    staging_path: PathBuf,
    staging: Mutex<tokio::fs::File>,
    options: Mutex<OpenOptionSet>,
    transfer_timeout: Duration,
    open: AtomicBool,
}

impl WritableChannel {
    /// Opens `key` for writing against `store`. Per spec §4.5's open
    /// procedure: `create-new` head-objects the target first and fails
    /// *already-exists* if present; otherwise, unless `create-new` or
    /// `assume-not-exists` is set, the current object contents (if any) are
    /// downloaded into the staging file before the channel is handed back,
    /// so writes layer on top of the existing object rather than starting
    /// from empty.
    pub async fn open(
        store: Arc<dyn ObjectStore>,
        key: impl Into<String>,
        staging_dir: &std::path::Path,
        mut options: OpenOptionSet,
        transfer_timeout: Duration,
    ) -> Result<Self> {
        let key = key.into();
        if options.contains_create_new() && store.head(&key).await.is_ok() {
            return Err(ErrorKind::AlreadyExists(key).into());
        }
        let transfer = TransferUtil::new(store.clone());
        let staging_path = unique_staging_path(staging_dir);
        let initial = if options.contains_assume_not_exists() {
            Vec::new()
        } else {
            match store.head(&key).await {
                Ok(attributes) => {
                    options.observe_get(&attributes);
                    match options.range() {
                        // `range(start, end)` is open-only: fetch exactly that
                        // slice into the staging file instead of the whole object.
                        Some(range) => {
                            let request = GetRequest { range: Some(range) };
                            let fetch = store.get(&key, &request);
                            match tokio::time::timeout(transfer_timeout, fetch).await {
                                Ok(result) => result?.to_vec(),
                                Err(_) => return Err(ErrorKind::TransferTimeout(transfer_timeout).into()),
                            }
                        },
                        None => transfer.download(&key, attributes.size, transfer_timeout).await?.to_vec(),
                    }
                },
                Err(err) if matches!(&*err, ErrorKind::NoSuchObject(_)) => Vec::new(),
                Err(err) => return Err(err),
            }
        };
        tokio::fs::write(&staging_path, &initial).await.map_err(ErrorKind::from)?;
        let staging = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&staging_path)
            .await
            .map_err(ErrorKind::from)?;
        options.on_open(&initial);
        Ok(Self {
            key,
            transfer,
            staging_path,
            staging: Mutex::new(staging),
            options: Mutex::new(options),
            transfer_timeout,
            open: AtomicBool::new(true),
        })
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Appends `bytes` at the channel's current staging-file position.
    pub async fn write(&self, bytes: &[u8]) -> Result<usize> {
        if !self.is_open() {
            return Err(ErrorKind::ClosedChannel.into());
        }
        let mut staging = self.staging.lock().await;
        staging.write_all(bytes).await.map_err(ErrorKind::from)?;
        Ok(bytes.len())
    }

    /// Seeks the staging file to `position`, for overwrite-in-place writes.
    pub async fn position(&self, position: u64) -> Result<()> {
        if !self.is_open() {
            return Err(ErrorKind::ClosedChannel.into());
        }
        let mut staging = self.staging.lock().await;
        staging.seek(std::io::SeekFrom::Start(position)).await.map_err(ErrorKind::from)?;
        Ok(())
    }

    async fn staging_bytes(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.staging_path).await.map_err(|e| ErrorKind::from(e).into())
    }

    /// Current length of the staging file, for [`crate::channel::seekable::SeekableChannel::size`].
    pub async fn staged_len(&self) -> Result<u64> {
        let metadata = tokio::fs::metadata(&self.staging_path).await.map_err(ErrorKind::from)?;
        Ok(metadata.len())
    }

    /// Flushes the staging file's current contents to the object store
    /// without closing the channel, so further writes can follow.
    pub async fn force(&self) -> Result<()> {
        if !self.is_open() {
            return Err(ErrorKind::ClosedChannel.into());
        }
        self.options.lock().await.reject_force_with_assume_not_exists()?;
        self.flush().await
    }

    async fn flush(&self) -> Result<()> {
        let bytes = self.staging_bytes().await?;
        let mut options = self.options.lock().await;
        let vetoed = options.veto_put(&bytes);
        if vetoed {
            return Ok(());
        }
        let mut request = PutRequest::default();
        options.adapt_put(&mut request, &bytes);
        let outcome = self.transfer.upload(&self.key, bytes, &request, self.transfer_timeout).await?;
        options.observe_put(&outcome);
        Ok(())
    }

    /// Flushes any staged bytes and marks the channel closed. Idempotent: a
    /// second call on an already-closed channel is a no-op. If the upload
    /// fails the channel stays open and the staging file survives, so the
    /// caller can retry by calling `close` again.
    pub async fn close(&self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.flush().await?;
        self.open.store(false, Ordering::Release);
        tokio::fs::remove_file(&self.staging_path).await.ok();
        Ok(())
    }
}

/// Generates a staging path unique within `dir`, named after the channel
/// count rather than a random suffix since each `WritableChannel` already
/// owns its own temp directory slice.
fn unique_staging_path(dir: &std::path::Path) -> PathBuf {
    use std::sync::atomic::AtomicU64;
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    dir.join(format!("write-{id}.staging"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::option::{OpenOption, OpenOptionSet};
    use crate::client::store::MockObjectStore;
    use s3nio_config::IntegrityAlgorithm;

    fn store() -> Arc<MockObjectStore> {
        Arc::new(MockObjectStore::new())
    }

    #[tokio::test]
    async fn write_then_close_uploads_staged_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        let channel =
            WritableChannel::open(store.clone(), "k", dir.path(), OpenOptionSet::default(), Duration::from_secs(5))
                .await
                .unwrap();
        channel.write(b"hello").await.unwrap();
        channel.close().await.unwrap();
        assert!(store.contains("k"));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        let channel =
            WritableChannel::open(store, "k", dir.path(), OpenOptionSet::default(), Duration::from_secs(5))
                .await
                .unwrap();
        channel.write(b"data").await.unwrap();
        channel.close().await.unwrap();
        channel.close().await.unwrap();
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        let channel =
            WritableChannel::open(store, "k", dir.path(), OpenOptionSet::default(), Duration::from_secs(5))
                .await
                .unwrap();
        channel.close().await.unwrap();
        let err = channel.write(b"late").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ClosedChannel));
    }

    #[tokio::test]
    async fn force_uploads_without_closing_the_channel() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        let channel =
            WritableChannel::open(store.clone(), "k", dir.path(), OpenOptionSet::default(), Duration::from_secs(5))
                .await
                .unwrap();
        channel.write(b"first").await.unwrap();
        channel.force().await.unwrap();
        assert!(channel.is_open());
        assert!(store.contains("k"));
        channel.write(b"-second").await.unwrap();
        channel.close().await.unwrap();
    }

    #[tokio::test]
    async fn assume_not_exists_rejects_reupload_over_existing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        store.seed("k", b"existing".to_vec());
        let options = OpenOptionSet::new(vec![OpenOption::AssumeNotExists]);
        let channel = WritableChannel::open(store, "k", dir.path(), options, Duration::from_secs(5)).await.unwrap();
        channel.write(b"new").await.unwrap();
        let err = channel.close().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn put_only_if_modified_skips_upload_when_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        let options = OpenOptionSet::new(vec![OpenOption::PutOnlyIfModified(IntegrityAlgorithm::Crc32)]);
        let channel = WritableChannel::open(store.clone(), "k", dir.path(), options, Duration::from_secs(5)).await.unwrap();
        channel.close().await.unwrap();
        assert!(!store.contains("k"));
    }

    #[tokio::test]
    async fn create_new_fails_already_exists_over_an_existing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        store.seed("a/b", b"x".to_vec());
        let options = OpenOptionSet::new(vec![OpenOption::CreateNew]);
        let err = WritableChannel::open(store.clone(), "a/b", dir.path(), options, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        let bytes = store.get("a/b", &Default::default()).await.unwrap();
        assert_eq!(bytes.as_ref(), b"x");
    }

    #[tokio::test]
    async fn create_new_succeeds_over_a_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        let options = OpenOptionSet::new(vec![OpenOption::CreateNew]);
        let channel =
            WritableChannel::open(store.clone(), "new-key", dir.path(), options, Duration::from_secs(5)).await.unwrap();
        channel.write(b"contents").await.unwrap();
        channel.close().await.unwrap();
        assert!(store.contains("new-key"));
    }

    #[tokio::test]
    async fn open_without_create_new_or_assume_not_exists_downloads_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        store.seed("k", b"existing-body".to_vec());
        let channel =
            WritableChannel::open(store.clone(), "k", dir.path(), OpenOptionSet::default(), Duration::from_secs(5))
                .await
                .unwrap();
        assert_eq!(channel.staged_len().await.unwrap(), "existing-body".len() as u64);
        channel.close().await.unwrap();
        let bytes = store.get("k", &Default::default()).await.unwrap();
        assert_eq!(bytes.as_ref(), b"existing-body");
    }

    #[tokio::test]
    async fn range_option_stages_only_the_requested_slice() {
        use crate::client::store::ByteRange;
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        store.seed("k", b"ABCDEFGHIJ".to_vec());
        let options = OpenOptionSet::new(vec![OpenOption::Range(ByteRange { start: 2, end_inclusive: 4 })]);
        let channel = WritableChannel::open(store, "k", dir.path(), options, Duration::from_secs(5)).await.unwrap();
        assert_eq!(channel.staged_len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn force_rejects_assume_not_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        let options = OpenOptionSet::new(vec![OpenOption::AssumeNotExists]);
        let channel = WritableChannel::open(store, "k", dir.path(), options, Duration::from_secs(5)).await.unwrap();
        channel.write(b"new").await.unwrap();
        let err = channel.force().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidOptions(_)));
    }

    #[tokio::test]
    async fn force_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        let channel =
            WritableChannel::open(store, "k", dir.path(), OpenOptionSet::default(), Duration::from_secs(5))
                .await
                .unwrap();
        channel.close().await.unwrap();
        let err = channel.force().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ClosedChannel));
    }
}
