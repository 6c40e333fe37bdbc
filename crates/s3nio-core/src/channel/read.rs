//! Random-access reads over a remote object via a bounded fragment prefetch
//! cache (spec §4.4).

use crate::client::store::{ByteRange, GetRequest, ObjectStore};
use crate::error::{ErrorKind, Result};
use crate::fragment::Fragment;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Default fragment size: 5 MiB, matching `s3.spi.read.max-fragment-size`'s default.
pub const DEFAULT_FRAGMENT_SIZE: u64 = 5 * 1024 * 1024;
/// Default cache capacity, matching `s3.spi.read.max-fragment-number`'s default.
pub const DEFAULT_MAX_FRAGMENTS: usize = 50;
/// Default per-fragment read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Serves random-access reads over one object, held open until [`Self::close`].
/// Single-reader from the caller's perspective: callers serialize their own
/// `read_at` calls, while fetches the cache dispatches run concurrently on
/// the runtime's worker pool.
pub struct ReadAheadChannel {
    store: Arc<dyn ObjectStore>,
    key: String,
    size: u64,
    fragment_size: u64,
    max_fragments: usize,
    read_timeout: Duration,
    fragments: DashMap<u64, Fragment>,
    open: AtomicBool,
}

impl ReadAheadChannel {
    /// Opens `key`, capturing its size via head-object as the channel's
    /// immutable `(object-identity, size)` pair.
    pub async fn open(
        store: Arc<dyn ObjectStore>,
        key: impl Into<String>,
        fragment_size: u64,
        max_fragments: usize,
        read_timeout: Duration,
    ) -> Result<Self> {
        let key = key.into();
        let attributes = store.head(&key).await?;
        Ok(Self {
            store,
            key,
            size: attributes.size,
            fragment_size: fragment_size.max(1),
            max_fragments: max_fragments.max(2),
            read_timeout,
            fragments: DashMap::new(),
            open: AtomicBool::new(true),
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Number of fragments currently resident; never exceeds `max_fragments`.
    pub fn cached_fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_fragment_cached(&self, index: u64) -> bool {
        self.fragments.contains_key(&index)
    }

    fn last_fragment_index(&self) -> u64 {
        if self.size == 0 { 0 } else { (self.size - 1) / self.fragment_size }
    }

    /// Reads starting at channel position `p` into `dst`, returning the
    /// number of bytes copied (0 at or past end-of-file).
    pub async fn read_at(&self, p: u64, dst: &mut [u8]) -> Result<usize> {
        if !self.is_open() {
            return Err(exn::Exn::from(ErrorKind::ClosedChannel));
        }
        if p >= self.size || dst.is_empty() {
            return Ok(0);
        }
        let i = p / self.fragment_size;
        let off = (p - i * self.fragment_size) as usize;
        let fragment = self.ensure_fragment(i);
        let bytes = fragment.await_ready(self.read_timeout).await?;
        let available = bytes.len().saturating_sub(off);
        let n = available.min(dst.len());
        dst[..n].copy_from_slice(&bytes[off..off + n]);
        self.maybe_prefetch(i, off, off + n);
        Ok(n)
    }

    /// Returns the (possibly freshly-spawned) fragment for `index`, evicting
    /// to stay within `max_fragments` if this is a new entry.
    fn ensure_fragment(&self, index: u64) -> Fragment {
        match self.fragments.entry(index) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(vacant) => {
                self.evict_for(index);
                let (fragment, setter) = Fragment::pending(index);
                vacant.insert(fragment.clone());
                let store = self.store.clone();
                let key = self.key.clone();
                let fragment_size = self.fragment_size;
                let size = self.size;
                tokio::spawn(async move {
                    let start = index * fragment_size;
                    let end_inclusive = ((index + 1) * fragment_size).min(size).saturating_sub(1);
                    let request = GetRequest { range: Some(ByteRange { start, end_inclusive }) };
                    setter.complete(store.get(&key, &request).await);
                });
                fragment
            },
        }
    }

    /// Eviction rule: when adding `index` would exceed `max_fragments`, evict
    /// the lowest-indexed fragment strictly less than `index`; if every
    /// resident fragment already has an index `>= index`, evict the lowest
    /// overall rather than leave the cache over capacity.
    fn evict_for(&self, index: u64) {
        if self.fragments.len() < self.max_fragments {
            return;
        }
        let victim = self
            .fragments
            .iter()
            .map(|entry| *entry.key())
            .filter(|&k| k < index)
            .min()
            .or_else(|| self.fragments.iter().map(|entry| *entry.key()).min());
        if let Some(victim) = victim
            && let Some((_, fragment)) = self.fragments.remove(&victim)
        {
            fragment.mark_evicted();
        }
    }

    /// Invalidates every fragment with index `< i`.
    fn invalidate_before(&self, i: u64) {
        let stale: Vec<u64> = self.fragments.iter().map(|entry| *entry.key()).filter(|&k| k < i).collect();
        for index in stale {
            if let Some((_, fragment)) = self.fragments.remove(&index) {
                fragment.mark_evicted();
            }
        }
    }

    /// Step 6 of the read algorithm: once a read's consumed window crosses
    /// the fragment midpoint, drop fragments behind `i` and kick off
    /// prefetch for the fragments ahead.
    fn maybe_prefetch(&self, i: u64, off_start: usize, off_end: usize) {
        let half = (self.fragment_size / 2) as usize;
        if off_end < half || off_start >= half {
            return;
        }
        self.invalidate_before(i);
        let last = self.last_fragment_index();
        let max_prefetch = (self.max_fragments as u64 - 1).min(last.saturating_sub(i));
        for j in (i + 1)..=(i + max_prefetch) {
            if j > last || self.fragments.contains_key(&j) {
                continue;
            }
            self.ensure_fragment(j);
        }
    }

    /// Closes the channel: further reads fail *closed-channel*; all resident
    /// fragments are invalidated (in-flight fetches are not cancelled, just
    /// discarded — best-effort per spec §5).
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        for entry in self.fragments.iter() {
            entry.value().mark_evicted();
        }
        self.fragments.clear();
    }
}
