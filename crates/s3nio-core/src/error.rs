//! Core Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction, following the same shape as every
//! other crate in this workspace: an `ErrorKind` enum plus an `Exn<ErrorKind>`
//! alias.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A core error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Details carried by a wrapped transport failure (spec §7 `transfer-failure`).
#[derive(Debug, Clone, Display)]
#[display("{method} {path} failed: status={status:?} code={error_code:?} request_id={request_id:?} attempts={attempts}")]
pub struct TransferFailure {
    pub method: &'static str,
    pub path: String,
    pub status: Option<u16>,
    pub error_code: Option<String>,
    pub request_id: Option<String>,
    pub attempts: u32,
}

/// Actionable error categories, matching spec §7's taxonomy.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Malformed URI, illegal key character, or a key that would contain a NUL byte.
    #[display("invalid path: {_0}")]
    InvalidPath(#[error(not(source))] String),
    /// Read+write, SYNC/DSYNC, or another unsupported option combination.
    #[display("invalid open option combination: {_0}")]
    InvalidOptions(#[error(not(source))] String),
    /// Lock, mmap, truncate, setAttribute, setTimes and similar operations this
    /// store has no equivalent for.
    #[display("unsupported operation: {_0}")]
    Unsupported(#[error(not(source))] String),
    /// Operation attempted on a channel/filesystem that has already been closed.
    #[display("channel is closed")]
    ClosedChannel,
    /// `read()`/`position(n)` called against a channel opened for write only.
    #[display("channel is not open for reading")]
    NonReadable,
    /// `write()`/`force()` called against a channel opened for read only.
    #[display("channel is not open for writing")]
    NonWritable,
    /// `create-new` was requested but the object already exists.
    #[display("already exists: {_0}")]
    AlreadyExists(#[error(not(source))] String),
    /// Head of a missing object.
    #[display("no such object: {_0}")]
    NoSuchObject(#[error(not(source))] String),
    /// 403 at any boundary.
    #[display("access denied: {_0}")]
    AccessDenied(#[error(not(source))] String),
    /// `NoSuchBucket` on list/head.
    #[display("bucket not found: {_0}")]
    BucketNotFound(#[error(not(source))] String),
    /// 412 from a conditional upload (`If-Match`/`If-None-Match`).
    #[display("precondition failed: {_0}")]
    PreconditionFailed(#[error(not(source))] String),
    /// Wraps a transport-level failure with request diagnostics.
    #[display("transfer failure: {_0}")]
    TransferFailure(#[error(not(source))] TransferFailure),
    /// A fragment fetch exceeded its per-fragment read timeout.
    #[display("read timed out after {_0:?}")]
    ReadTimeout(#[error(not(source))] std::time::Duration),
    /// A whole-object download/upload exceeded its configured timeout.
    #[display("transfer timed out after {_0:?}")]
    TransferTimeout(#[error(not(source))] std::time::Duration),
    /// A head-object call for attribute resolution exceeded its timeout.
    #[display("attribute fetch timed out after {_0:?}")]
    AttributeTimeout(#[error(not(source))] std::time::Duration),
    /// Region discovery (head-bucket / get-bucket-location) exceeded its timeout.
    #[display("bucket region discovery timed out after {_0:?}")]
    BucketDiscoveryTimeout(#[error(not(source))] std::time::Duration),
    /// Underlying local I/O error (staging file, temp directory).
    #[display("I/O error: {_0}")]
    Io(std::io::Error),
    /// Catch-all for backend/transport errors that don't map to a more
    /// specific kind above (e.g. malformed SDK responses).
    #[display("backend error: {_0}")]
    Backend(#[error(not(source))] String),
}
impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying the whole operation might succeed.
    ///
    /// Timeouts and generic backend/IO hiccups are retryable; anything that
    /// reflects a stable fact about the object or the request (not found,
    /// already exists, access denied, precondition failed, invalid
    /// path/options) is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Backend(_)
                | Self::TransferFailure(_)
                | Self::ReadTimeout(_)
                | Self::TransferTimeout(_)
                | Self::AttributeTimeout(_)
                | Self::BucketDiscoveryTimeout(_)
        )
    }
}

/// Convenience for building an [`InvalidPath`](ErrorKind::InvalidPath) error
/// out of anything path-shaped.
pub(crate) fn invalid_path(path: impl Into<PathBuf>) -> ErrorKind {
    ErrorKind::InvalidPath(path.into().display().to_string())
}
