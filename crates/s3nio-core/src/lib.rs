//! Byte-channel filesystem core for an S3-backed NIO-style storage provider.
//!
//! Ties together the path model, client provider, transfer utility, and the
//! read/write/seekable channel trio behind one entry point: a
//! [`FilesystemRegistry`] that resolves `s3://`/`s3x://` URIs into
//! `(FilesystemHandle, Path)` pairs, from which callers open channels, fetch
//! attributes, or list directories.

pub mod attributes;
pub mod channel;
pub mod client;
pub mod directory;
pub mod error;
pub mod filesystem;
pub mod fragment;
pub mod path;
pub mod transfer;

pub use crate::filesystem::{DeleteOutcome, Filesystem, FilesystemHandle, FilesystemRegistry};
pub use crate::path::Path;
pub use crate::path::uri::{ParsedUri, parse as parse_uri};
