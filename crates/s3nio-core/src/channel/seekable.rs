//! Unified read-xor-write façade over the two channel halves (spec §4.6).

use crate::channel::option::{OpenOption, OpenOptionSet};
use crate::channel::read::ReadAheadChannel;
use crate::channel::write::WritableChannel;
use crate::client::store::ObjectStore;
use crate::error::{ErrorKind, Result};
use crate::filesystem::FilesystemHandle;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Which direction a channel is opened for; there is no read+write mode
/// (rejected at open time, per the mixed-use prohibition).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// The caller-facing request to open a channel: mode plus options plus the
/// tunables [`ReadAheadChannel`]/[`WritableChannel`] need.
#[derive(Debug, Clone)]
pub struct OpenSpec {
    pub mode: OpenMode,
    pub options: Vec<OpenOption>,
    pub fragment_size: u64,
    pub max_fragments: usize,
    pub read_timeout: Duration,
    pub transfer_timeout: Duration,
}

impl OpenSpec {
    pub fn read() -> Self {
        Self {
            mode: OpenMode::Read,
            options: Vec::new(),
            fragment_size: crate::channel::read::DEFAULT_FRAGMENT_SIZE,
            max_fragments: crate::channel::read::DEFAULT_MAX_FRAGMENTS,
            read_timeout: crate::channel::read::DEFAULT_READ_TIMEOUT,
            transfer_timeout: crate::channel::write::DEFAULT_TRANSFER_TIMEOUT,
        }
    }

    pub fn write() -> Self {
        Self { mode: OpenMode::Write, ..Self::read() }
    }

    pub fn with_options(mut self, options: Vec<OpenOption>) -> Self {
        self.options = options;
        self
    }
}

enum Delegate {
    Read(ReadAheadChannel),
    Write(WritableChannel),
}

/// A single object's seekable channel: wraps exactly one delegate, tracks
/// position, and caches size after its first resolution.
pub struct SeekableChannel {
    delegate: Delegate,
    position: AtomicU64,
    cached_size: Mutex<Option<u64>>,
    /// Set by [`crate::filesystem::Filesystem::open_channel`] so `close` can
    /// deregister itself from the owning filesystem's open-channel set.
    registration: Mutex<Option<(FilesystemHandle, u64)>>,
}

impl SeekableChannel {
    /// Opens `key` per `spec`. SYNC/DSYNC aren't modeled as [`OpenOption`]
    /// variants at all, so any caller-supplied request for them must be
    /// rejected upstream of this constructor; this constructor only enforces
    /// the read-xor-write rule this façade itself owns.
    pub async fn open(
        store: Arc<dyn ObjectStore>,
        key: impl Into<String>,
        staging_dir: &std::path::Path,
        spec: OpenSpec,
    ) -> Result<Self> {
        let key = key.into();
        let options = OpenOptionSet::new(spec.options);
        let delegate = match spec.mode {
            OpenMode::Read => Delegate::Read(
                ReadAheadChannel::open(store, key, spec.fragment_size, spec.max_fragments, spec.read_timeout).await?,
            ),
            OpenMode::Write => Delegate::Write(
                WritableChannel::open(store, key, staging_dir, options, spec.transfer_timeout).await?,
            ),
        };
        Ok(Self { delegate, position: AtomicU64::new(0), cached_size: Mutex::new(None), registration: Mutex::new(None) })
    }

    /// Records `(owning filesystem, registry id)` so [`Self::close`] can
    /// deregister on its way out. Called once, right after registration.
    pub(crate) async fn set_registration(&self, fs: FilesystemHandle, id: u64) {
        *self.registration.lock().await = Some((fs, id));
    }

    /// Reads into `dst` at the channel's current position, advancing it by
    /// the number of bytes read. Fails *non-readable* against a write channel.
    pub async fn read(&self, dst: &mut [u8]) -> Result<usize> {
        let Delegate::Read(channel) = &self.delegate else {
            return Err(ErrorKind::NonReadable.into());
        };
        let position = self.position.load(Ordering::Acquire);
        let n = channel.read_at(position, dst).await?;
        self.position.fetch_add(n as u64, Ordering::AcqRel);
        Ok(n)
    }

    /// Writes `src` at the channel's current position, advancing it by
    /// `src.len()`. Fails *non-writable* against a read channel.
    pub async fn write(&self, src: &[u8]) -> Result<usize> {
        let Delegate::Write(channel) = &self.delegate else {
            return Err(ErrorKind::NonWritable.into());
        };
        channel.position(self.position.load(Ordering::Acquire)).await?;
        let n = channel.write(src).await?;
        self.position.fetch_add(n as u64, Ordering::AcqRel);
        Ok(n)
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    /// Repositions a read channel. Rejected against write channels, whose
    /// position is monotonic by contract.
    pub fn seek(&self, position: u64) -> Result<()> {
        if matches!(self.delegate, Delegate::Write(_)) {
            return Err(ErrorKind::InvalidOptions("write channels cannot seek backward".to_string()).into());
        }
        self.position.store(position, Ordering::Release);
        Ok(())
    }

    /// Cached after the first call: head-object size for read channels,
    /// staging-file length for write channels.
    pub async fn size(&self) -> Result<u64> {
        let mut cached = self.cached_size.lock().await;
        if let Some(size) = *cached {
            return Ok(size);
        }
        let size = match &self.delegate {
            Delegate::Read(channel) => channel.size(),
            Delegate::Write(channel) => channel.staged_len().await?,
        };
        *cached = Some(size);
        Ok(size)
    }

    /// Unsupported: this store has no `truncate` equivalent.
    pub fn truncate(&self, _n: u64) -> Result<()> {
        Err(ErrorKind::Unsupported("truncate".to_string()).into())
    }

    /// Closes the active delegate and deregisters from the owning
    /// filesystem's open-channel set, if registered. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let result = match &self.delegate {
            Delegate::Read(channel) => {
                channel.close();
                Ok(())
            },
            Delegate::Write(channel) => channel.close().await,
        };
        if let Some((fs, id)) = self.registration.lock().await.take() {
            fs.deregister_channel(id);
        }
        result
    }
}
