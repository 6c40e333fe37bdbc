//! Fragments: the fixed-size prefetch unit held by a [`crate::channel::read::ReadAheadChannel`].

use crate::error::Result;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A fragment's lifecycle: in flight, delivered, or dropped from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentState {
    Pending,
    Ready,
    Evicted,
}

/// A single `(object-identity, fragment-index)` cell.
///
/// Fetch errors are recorded on the fragment and only surfaced to a reader
/// that actually awaits it (per spec §7 propagation rules) — other readers,
/// and other fragments, are unaffected.
#[derive(Clone)]
pub struct Fragment {
    pub index: u64,
    inner: Arc<Inner>,
}

/// A fragment's fetch outcome, replayable to every awaiter. The original
/// [`crate::error::ErrorKind`] isn't `Clone` (it wraps `std::io::Error`), so a
/// failure is flattened to its rendered message and replayed as
/// [`crate::error::ErrorKind::Backend`] for any awaiter beyond the first.
#[derive(Clone)]
enum FragmentResult {
    Ready(Bytes),
    Failed(String),
}

struct Inner {
    state: tokio::sync::watch::Sender<FragmentState>,
    result: tokio::sync::OnceCell<FragmentResult>,
    /// Lets multiple concurrent awaiters of the same in-flight fetch observe
    /// its completion without polling; the fetch task itself owns `result`.
    done: broadcast::Sender<()>,
}

impl Fragment {
    /// Creates a fragment in the `pending` state together with the setter
    /// the fetch task uses to publish its outcome.
    pub fn pending(index: u64) -> (Self, FragmentSetter) {
        let (state_tx, _) = tokio::sync::watch::channel(FragmentState::Pending);
        let (done_tx, _) = broadcast::channel(1);
        let inner = Arc::new(Inner { state: state_tx, result: tokio::sync::OnceCell::new(), done: done_tx });
        let fragment = Self { index, inner: inner.clone() };
        let setter = FragmentSetter { inner };
        (fragment, setter)
    }

    pub fn state(&self) -> FragmentState {
        *self.inner.state.borrow()
    }

    /// Awaits this fragment's bytes, up to the caller-supplied timeout.
    /// Safe to cancel: dropping the future leaves the underlying fetch
    /// (and any other awaiter) untouched.
    pub async fn await_ready(&self, timeout: std::time::Duration) -> Result<Bytes> {
        let mut rx = self.inner.done.subscribe();
        let wait = async {
            loop {
                if let Some(result) = self.inner.result.get() {
                    return result.clone();
                }
                if rx.recv().await.is_err() {
                    // Sender dropped without ever completing: treat as closed.
                    return FragmentResult::Failed("fragment fetch abandoned".to_string());
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(FragmentResult::Ready(bytes)) => Ok(bytes),
            Ok(FragmentResult::Failed(message)) => Err(exn::Exn::from(crate::error::ErrorKind::Backend(message))),
            Err(_) => Err(exn::Exn::from(crate::error::ErrorKind::ReadTimeout(timeout))),
        }
    }

    pub fn mark_evicted(&self) {
        let _ = self.inner.state.send(FragmentState::Evicted);
    }
}

/// The write half of a [`Fragment`], held by the task performing the fetch.
pub struct FragmentSetter {
    inner: Arc<Inner>,
}
impl FragmentSetter {
    pub fn complete(self, result: Result<Bytes>) {
        let stored = match result {
            Ok(bytes) => FragmentResult::Ready(bytes),
            Err(err) => FragmentResult::Failed(err.to_string()),
        };
        let _ = self.inner.result.set(stored);
        let _ = self.inner.state.send(FragmentState::Ready);
        let _ = self.inner.done.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_fragment_returns_bytes_immediately() {
        let (fragment, setter) = Fragment::pending(0);
        setter.complete(Ok(Bytes::from_static(b"hello")));
        let bytes = fragment.await_ready(std::time::Duration::from_secs(1)).await.unwrap();
        assert_eq!(bytes.as_ref(), b"hello");
        assert_eq!(fragment.state(), FragmentState::Ready);
    }

    #[tokio::test]
    async fn pending_fragment_wakes_awaiter_on_completion() {
        let (fragment, setter) = Fragment::pending(3);
        let waiter = fragment.clone();
        let handle = tokio::spawn(async move { waiter.await_ready(std::time::Duration::from_secs(1)).await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        setter.complete(Ok(Bytes::from_static(b"later")));
        let bytes = handle.await.unwrap().unwrap();
        assert_eq!(bytes.as_ref(), b"later");
    }

    #[tokio::test]
    async fn timeout_fails_read_timeout_without_disturbing_the_fetch() {
        let (fragment, setter) = Fragment::pending(0);
        let result = fragment.await_ready(std::time::Duration::from_millis(5)).await;
        assert!(matches!(&*result.unwrap_err(), crate::error::ErrorKind::ReadTimeout(_)));
        setter.complete(Ok(Bytes::from_static(b"late but fine")));
        let bytes = fragment.await_ready(std::time::Duration::from_secs(1)).await.unwrap();
        assert_eq!(bytes.as_ref(), b"late but fine");
    }

    #[tokio::test]
    async fn error_is_only_surfaced_to_awaiters() {
        let (fragment, setter) = Fragment::pending(0);
        setter.complete(Err(exn::Exn::from(crate::error::ErrorKind::NoSuchObject("k".into()))));
        let result = fragment.await_ready(std::time::Duration::from_secs(1)).await;
        // The cached failure is flattened to a message and replayed as `Backend`
        // for any awaiter (see `FragmentResult`), so only the message survives.
        assert!(matches!(&*result.unwrap_err(), crate::error::ErrorKind::Backend(msg) if msg.contains("no such object")));
    }
}
