//! Attribute fetch: head-object resolved into `(last-modified, size, etag)`,
//! short-circuited for directory-inferred paths (spec §4.8).

use crate::client::store::ObjectAttributes;
use crate::error::{ErrorKind, Result};
use crate::path::Path;
use std::time::Duration;

/// Default timeout for the head-object call this performs.
pub const DEFAULT_ATTRIBUTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolves `path`'s attributes. Directory-inferred paths short-circuit to
/// the directory sentinel without any network I/O.
pub async fn fetch(path: &Path) -> Result<ObjectAttributes> {
    fetch_with_timeout(path, DEFAULT_ATTRIBUTE_TIMEOUT).await
}

pub async fn fetch_with_timeout(path: &Path, timeout: Duration) -> Result<ObjectAttributes> {
    if path.is_directory() {
        return Ok(ObjectAttributes::directory_sentinel());
    }
    let store = path.filesystem().store().await?;
    let head = store.head(path.object_key());
    match tokio::time::timeout(timeout, head).await {
        Ok(result) => result,
        Err(_) => Err(ErrorKind::AttributeTimeout(timeout).into()),
    }
}

/// There is no setter surface over object attributes: mutation is always
/// *unsupported*, independent of which attribute is named.
pub fn set_attribute(name: &str) -> Result<()> {
    Err(ErrorKind::Unsupported(format!("setAttribute({name})")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::store::MockObjectStore;
    use crate::filesystem::Filesystem;
    use std::sync::Arc;

    #[tokio::test]
    async fn fetches_attributes_for_existing_object() {
        let store = Arc::new(MockObjectStore::new());
        store.seed("a/b.txt", b"hello".to_vec());
        let fs = Filesystem::for_test_with_store("bucket", store);
        let path = Path::parse(fs, "a/b.txt").unwrap();
        let attrs = fetch(&path).await.unwrap();
        assert_eq!(attrs.size, 5);
    }

    #[tokio::test]
    async fn directory_path_returns_sentinel_without_network() {
        let fs = Filesystem::for_test("bucket");
        let path = Path::parse(fs, "a/b/").unwrap();
        let attrs = fetch(&path).await.unwrap();
        assert_eq!(attrs, ObjectAttributes::directory_sentinel());
    }

    #[tokio::test]
    async fn missing_object_fails_no_such_object() {
        let fs = Filesystem::for_test("bucket");
        let path = Path::parse(fs, "missing").unwrap();
        let err = fetch(&path).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NoSuchObject(_)));
    }

    #[test]
    fn set_attribute_is_always_unsupported() {
        let err = set_attribute("permissions").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unsupported(_)));
    }
}
