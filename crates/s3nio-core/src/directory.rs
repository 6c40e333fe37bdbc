//! Directory stream: a flat, delimiter-paginated listing turned into a
//! lazily materialized stream of child paths (spec §4.7).

use crate::client::store::ObjectStore;
use crate::path::Path;
use async_stream::stream;
use futures::Stream;
use std::sync::Arc;

/// Lists the direct children of `dir`, a directory-inferred path.
///
/// *bucket-not-found* and *access-denied* on the first page surface on the
/// first item pulled from the stream (there's no separate construction step
/// to surface them on, since the listing is itself lazy); later-page
/// failures surface on whichever `next` call triggers that page's fetch.
/// The directory marker itself (an object whose key equals `dir`'s key
/// exactly) is dropped so iteration can't loop back onto its own root.
pub fn list(dir: Path) -> impl Stream<Item = crate::error::Result<Path>> {
    list_filtered(dir, |_| true)
}

/// As [`list`], but applies a caller-supplied predicate to every candidate
/// child path before it's yielded. A predicate that panics is treated the
/// same as one that returns `false` (spec §4.7: "swallow predicate
/// exceptions as rejection, log-and-continue") rather than tearing down the
/// whole stream over one bad entry.
pub fn list_filtered<F>(dir: Path, predicate: F) -> impl Stream<Item = crate::error::Result<Path>>
where
    F: Fn(&Path) -> bool + 'static,
{
    stream! {
        let fs = dir.filesystem().clone();
        let store: Arc<dyn ObjectStore> = match fs.store().await {
            Ok(store) => store,
            Err(err) => {
                yield Err(err);
                return;
            },
        };
        let prefix = dir.object_key().to_string();
        let mut continuation_token = None;
        loop {
            let page = match store.list(&prefix, "/", continuation_token.clone()).await {
                Ok(page) => page,
                Err(err) => {
                    yield Err(err);
                    return;
                },
            };
            let candidates = page.common_prefixes.into_iter().chain(page.contents.into_iter().map(|(key, _)| key));
            for key in candidates {
                if key == prefix {
                    continue;
                }
                match Path::parse(fs.clone(), &key) {
                    Ok(path) => {
                        let accepted = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| predicate(&path)))
                            .unwrap_or_else(|_| {
                                tracing::warn!(key = %path.object_key(), "directory-listing predicate panicked; rejecting entry");
                                false
                            });
                        if accepted {
                            yield Ok(path);
                        }
                    },
                    Err(err) => yield Err(err),
                }
            }
            continuation_token = page.next_continuation_token;
            if continuation_token.is_none() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::store::MockObjectStore;
    use crate::filesystem::Filesystem;
    use futures::StreamExt;

    #[tokio::test]
    async fn lists_common_prefixes_and_contents_as_child_paths() {
        let store = Arc::new(MockObjectStore::new());
        store.seed("dir/a.txt", b"1".to_vec());
        store.seed("dir/b.txt", b"2".to_vec());
        store.seed("dir/sub/c.txt", b"3".to_vec());
        let fs = Filesystem::for_test_with_store("bucket", store);
        let dir = Path::parse(fs, "dir/").unwrap();
        let entries: Vec<String> =
            list(dir).map(|r| r.unwrap().object_key().to_string()).collect::<Vec<_>>().await;
        assert_eq!(entries, vec!["dir/sub/".to_string(), "dir/a.txt".to_string(), "dir/b.txt".to_string()]);
    }

    #[tokio::test]
    async fn drops_the_directory_marker_itself() {
        let store = Arc::new(MockObjectStore::new());
        store.seed("dir/", b"".to_vec());
        store.seed("dir/a.txt", b"1".to_vec());
        let fs = Filesystem::for_test_with_store("bucket", store);
        let dir = Path::parse(fs, "dir/").unwrap();
        let entries: Vec<String> =
            list(dir).map(|r| r.unwrap().object_key().to_string()).collect::<Vec<_>>().await;
        assert_eq!(entries, vec!["dir/a.txt".to_string()]);
    }

    #[tokio::test]
    async fn predicate_filters_out_rejected_entries() {
        let store = Arc::new(MockObjectStore::new());
        store.seed("dir/a.txt", b"1".to_vec());
        store.seed("dir/b.log", b"2".to_vec());
        let fs = Filesystem::for_test_with_store("bucket", store);
        let dir = Path::parse(fs, "dir/").unwrap();
        let entries: Vec<String> = list_filtered(dir, |p| p.object_key().ends_with(".txt"))
            .map(|r| r.unwrap().object_key().to_string())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(entries, vec!["dir/a.txt".to_string()]);
    }

    #[tokio::test]
    async fn panicking_predicate_is_treated_as_rejection() {
        let store = Arc::new(MockObjectStore::new());
        store.seed("dir/a.txt", b"1".to_vec());
        store.seed("dir/b.txt", b"2".to_vec());
        let fs = Filesystem::for_test_with_store("bucket", store);
        let dir = Path::parse(fs, "dir/").unwrap();
        let entries: Vec<String> = list_filtered(dir, |p| {
            if p.object_key() == "dir/a.txt" {
                panic!("boom");
            }
            true
        })
        .map(|r| r.unwrap().object_key().to_string())
        .collect::<Vec<_>>()
        .await;
        assert_eq!(entries, vec!["dir/b.txt".to_string()]);
    }

    #[tokio::test]
    async fn empty_directory_yields_no_entries() {
        let fs = Filesystem::for_test("bucket");
        let dir = Path::parse(fs, "empty/").unwrap();
        let entries: Vec<_> = list(dir).collect::<Vec<_>>().await;
        assert!(entries.is_empty());
    }
}
