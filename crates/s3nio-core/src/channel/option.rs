//! Per-channel open options (spec §4.5).
//!
//! Restates the source's stateful, subclassed option objects as a stateless
//! `Copy` enum plus a separate [`OpenOptionState`]: a channel holds one
//! `OpenOptionSet`, built fresh on every open, so "stateful options must be
//! per-channel instances" falls out of ordinary construction instead of a
//! deep-copy step.

use crate::client::store::{ByteRange, GetRequest, ObjectAttributes, PutOutcome, PutRequest};
use crate::error::{ErrorKind, Result};
use base64::Engine;
use s3nio_config::IntegrityAlgorithm;

/// A typed, copyable knob attached to a channel at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOption {
    /// Head-objects the target on open and fails *already-exists* if present;
    /// otherwise behaves like `AssumeNotExists` (no open-time download, sets
    /// `If-None-Match: *` on upload).
    CreateNew,
    /// Sets `If-None-Match: *` on upload; skips the open-time download.
    AssumeNotExists,
    /// Captures the downloaded ETag on open; sets `If-Match` on upload.
    PreventConcurrentOverwrite,
    /// Skips the upload on close if the staging file's checksum hasn't
    /// changed since open (or since the last upload).
    PutOnlyIfModified(IntegrityAlgorithm),
    /// Forces the multi-part path for both directions.
    UseTransferManager,
    /// Sets the `Range` header for the download (open-only).
    Range(ByteRange),
    /// Attaches the chosen checksum algorithm and value to the upload.
    IntegrityCheck(IntegrityAlgorithm),
}

/// Per-channel state a stateful option accumulates across open/write/close.
/// Constructed fresh (`Default::default()`) by [`OpenOptionSet::new`].
#[derive(Debug, Clone, Default)]
struct OpenOptionState {
    captured_etag: Option<String>,
    memoized_checksum: Option<String>,
}

/// The unordered set of options a channel was opened with, together with
/// the state those options accumulate over that channel's lifetime.
#[derive(Debug, Clone, Default)]
pub struct OpenOptionSet {
    options: Vec<OpenOption>,
    state: OpenOptionState,
}

impl OpenOptionSet {
    pub fn new(options: Vec<OpenOption>) -> Self {
        Self { options, state: OpenOptionState::default() }
    }

    pub fn contains_create_new(&self) -> bool {
        self.options.iter().any(|o| matches!(o, OpenOption::CreateNew))
    }

    /// `create-new` and `assume-not-exists` both skip the open-time download
    /// and both want `If-None-Match: *` on upload; `create-new` additionally
    /// gates on a head-object at open time.
    pub fn contains_assume_not_exists(&self) -> bool {
        self.options.iter().any(|o| matches!(o, OpenOption::AssumeNotExists | OpenOption::CreateNew))
    }

    pub fn uses_transfer_manager(&self) -> bool {
        self.options.iter().any(|o| matches!(o, OpenOption::UseTransferManager))
    }

    pub fn range(&self) -> Option<ByteRange> {
        self.options.iter().find_map(|o| match o {
            OpenOption::Range(range) => Some(*range),
            _ => None,
        })
    }

    /// §4.5: `force` is incompatible with `assume-not-exists`, since a
    /// second upload under the same channel would re-send `If-None-Match: *`
    /// against an object `force` itself just created.
    pub fn reject_force_with_assume_not_exists(&self) -> Result<()> {
        if self.options.iter().any(|o| matches!(o, OpenOption::AssumeNotExists | OpenOption::CreateNew)) {
            return Err(exn::Exn::from(ErrorKind::InvalidOptions(
                "force is incompatible with assume-not-exists".to_string(),
            )));
        }
        Ok(())
    }

    /// Seeds state that a stateful option needs before the first read, e.g.
    /// `put-only-if-modified`'s baseline checksum of a freshly downloaded
    /// staging file.
    pub fn on_open(&mut self, staging: &[u8]) {
        for option in self.options.clone() {
            if let OpenOption::PutOnlyIfModified(algo) = option {
                self.state.memoized_checksum = Some(compute_checksum(algo, staging));
            }
        }
    }

    /// Adapts an outgoing download request (`range`).
    pub fn adapt_get(&self, request: &mut GetRequest) {
        if let Some(range) = self.range() {
            request.range = Some(range);
        }
    }

    /// Records state a download response exposes: the ETag
    /// `prevent-concurrent-overwrite` will require unchanged at upload time.
    pub fn observe_get(&mut self, attributes: &ObjectAttributes) {
        if self.options.iter().any(|o| matches!(o, OpenOption::PreventConcurrentOverwrite)) {
            self.state.captured_etag = attributes.etag.clone();
        }
    }

    /// Adapts an outgoing upload request: conditional headers and checksum.
    pub fn adapt_put(&self, request: &mut PutRequest, staging: &[u8]) {
        for option in &self.options {
            match option {
                OpenOption::AssumeNotExists | OpenOption::CreateNew => request.if_none_match_any = true,
                OpenOption::PreventConcurrentOverwrite => {
                    if let Some(etag) = &self.state.captured_etag {
                        request.if_match = Some(etag.clone());
                    }
                },
                OpenOption::IntegrityCheck(algo) => {
                    request.checksum = Some((*algo, compute_checksum(*algo, staging)));
                },
                OpenOption::PutOnlyIfModified(algo) => {
                    request.checksum.get_or_insert_with(|| (*algo, compute_checksum(*algo, staging)));
                },
                OpenOption::UseTransferManager | OpenOption::Range(_) => {},
            }
        }
    }

    /// Records state an upload response exposes: the new ETag, so a
    /// subsequent `force` under `prevent-concurrent-overwrite` checks
    /// against this channel's own last write rather than the open-time one.
    pub fn observe_put(&mut self, outcome: &PutOutcome) {
        if self.options.iter().any(|o| matches!(o, OpenOption::PreventConcurrentOverwrite)) {
            self.state.captured_etag = outcome.etag.clone();
        }
    }

    /// `put-only-if-modified`'s veto: re-computes the staging file's
    /// checksum and skips the upload iff it's unchanged since the last
    /// checkpoint (open, or the prior upload).
    pub fn veto_put(&mut self, staging: &[u8]) -> bool {
        let mut veto = false;
        for option in self.options.clone() {
            if let OpenOption::PutOnlyIfModified(algo) = option {
                let current = compute_checksum(algo, staging);
                if self.state.memoized_checksum.as_deref() == Some(current.as_str()) {
                    veto = true;
                }
                self.state.memoized_checksum = Some(current);
            }
        }
        veto
    }
}

/// Base64-encoded checksum of `bytes` under `algo`, per spec §4.5's
/// `integrity-check`/`put-only-if-modified` options. Matches the three
/// algorithms `aws-sdk-s3` itself offers as upload checksums.
pub fn compute_checksum(algo: IntegrityAlgorithm, bytes: &[u8]) -> String {
    let digest: [u8; 8] = match algo {
        IntegrityAlgorithm::Crc32 => {
            let mut value = [0u8; 8];
            value[4..].copy_from_slice(&crc32fast::hash(bytes).to_be_bytes());
            value
        },
        IntegrityAlgorithm::Crc32c => {
            let mut value = [0u8; 8];
            value[4..].copy_from_slice(&crc32c::crc32c(bytes).to_be_bytes());
            value
        },
        IntegrityAlgorithm::Crc64nvme => {
            let mut digest = crc64fast_nvme::Digest::new();
            digest.write(bytes);
            digest.sum64().to_be_bytes()
        },
    };
    let width = match algo {
        IntegrityAlgorithm::Crc32 | IntegrityAlgorithm::Crc32c => 4,
        IntegrityAlgorithm::Crc64nvme => 8,
    };
    base64::engine::general_purpose::STANDARD.encode(&digest[8 - width..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_for_identical_input() {
        let a = compute_checksum(IntegrityAlgorithm::Crc32, b"hello world");
        let b = compute_checksum(IntegrityAlgorithm::Crc32, b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_differs_across_algorithms() {
        let crc32 = compute_checksum(IntegrityAlgorithm::Crc32, b"payload");
        let crc32c = compute_checksum(IntegrityAlgorithm::Crc32c, b"payload");
        let crc64 = compute_checksum(IntegrityAlgorithm::Crc64nvme, b"payload");
        assert_ne!(crc32, crc32c);
        assert_ne!(crc32, crc64);
    }

    #[test]
    fn assume_not_exists_sets_if_none_match_and_rejects_force() {
        let set = OpenOptionSet::new(vec![OpenOption::AssumeNotExists]);
        let mut request = PutRequest::default();
        set.adapt_put(&mut request, b"");
        assert!(request.if_none_match_any);
        assert!(set.reject_force_with_assume_not_exists().is_err());
    }

    #[test]
    fn prevent_concurrent_overwrite_round_trips_etag_through_state() {
        let mut set = OpenOptionSet::new(vec![OpenOption::PreventConcurrentOverwrite]);
        set.observe_get(&ObjectAttributes {
            last_modified: time::OffsetDateTime::UNIX_EPOCH,
            size: 3,
            etag: Some("etag-1".to_string()),
        });
        let mut request = PutRequest::default();
        set.adapt_put(&mut request, b"abc");
        assert_eq!(request.if_match.as_deref(), Some("etag-1"));
    }

    #[test]
    fn range_option_adapts_get_but_not_put() {
        let set = OpenOptionSet::new(vec![OpenOption::Range(ByteRange { start: 0, end_inclusive: 9 })]);
        let mut get_request = GetRequest::default();
        set.adapt_get(&mut get_request);
        assert_eq!(get_request.range, Some(ByteRange { start: 0, end_inclusive: 9 }));
        let mut put_request = PutRequest::default();
        set.adapt_put(&mut put_request, b"x");
        assert!(put_request.checksum.is_none());
    }

    #[test]
    fn put_only_if_modified_vetoes_unchanged_content_and_reuploads_changed_content() {
        let mut set = OpenOptionSet::new(vec![OpenOption::PutOnlyIfModified(IntegrityAlgorithm::Crc32)]);
        set.on_open(b"unchanged");
        assert!(set.veto_put(b"unchanged"));
        assert!(!set.veto_put(b"changed"));
    }

    #[test]
    fn integrity_check_attaches_checksum_to_every_upload() {
        let set = OpenOptionSet::new(vec![OpenOption::IntegrityCheck(IntegrityAlgorithm::Crc64nvme)]);
        let mut request = PutRequest::default();
        set.adapt_put(&mut request, b"payload");
        let (algo, value) = request.checksum.expect("checksum should be attached");
        assert_eq!(algo, IntegrityAlgorithm::Crc64nvme);
        assert_eq!(value, compute_checksum(IntegrityAlgorithm::Crc64nvme, b"payload"));
    }

    #[test]
    fn empty_option_set_adapts_nothing() {
        let set = OpenOptionSet::default();
        let mut get_request = GetRequest::default();
        let mut put_request = PutRequest::default();
        set.adapt_get(&mut get_request);
        set.adapt_put(&mut put_request, b"x");
        assert_eq!(get_request, GetRequest::default());
        assert!(!put_request.if_none_match_any);
        assert!(put_request.if_match.is_none());
        assert!(put_request.checksum.is_none());
    }
}
