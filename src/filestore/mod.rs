// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod local;
mod memory;

pub use local::LocalFileStore;
pub use memory::MemoryFileStore;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::FileStoreError;

/// Name-addressed blob storage for episode media and published documents
///
/// Names are relative, `/` separated paths such as `sermons/abc.mp3`.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store everything `reader` yields under `name`, replacing any previous blob
    ///
    /// Returns the number of bytes written.
    async fn create(
        &self,
        name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, FileStoreError>;

    /// Size of a stored blob, [`FileStoreError::NotFound`] if there is none
    async fn size(&self, name: &str) -> Result<u64, FileStoreError>;

    async fn delete(&self, name: &str) -> Result<(), FileStoreError>;
}

/// A shared reference to a file store
pub type SharedFileStore = Arc<dyn FileStore>;

/// Reject names that could escape the store root
fn validate_name(name: &str) -> Result<(), FileStoreError> {
    let valid = !name.is_empty()
        && !name.starts_with('/')
        && !name.contains(['\\', '\0'])
        && name
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..");

    if valid {
        Ok(())
    } else {
        Err(FileStoreError::InvalidName {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn validate_name_accepts_nested_relative_names() {
        assert!(validate_name("feed.xml").is_ok());
        assert!(validate_name("sermons/abc.mp3").is_ok());
    }

    #[test]
    fn validate_name_rejects_escapes() {
        for name in ["", "/etc/passwd", "../x", "a/../b", "a//b", "a\\b", "a/./b"] {
            assert!(validate_name(name).is_err(), "{name} should be rejected");
        }
    }

    /// Behaviour every store has to share
    async fn check_contract<F: FileStore>(store: F) {
        assert!(store.size("sermons/a.mp3").await.unwrap_err().is_not_found());

        let written = store
            .create("sermons/a.mp3", &mut &b"hello world"[..])
            .await
            .unwrap();
        assert_eq!(written, 11);
        assert_eq!(store.size("sermons/a.mp3").await.unwrap(), 11);

        // Replacing a blob overwrites it
        store.create("sermons/a.mp3", &mut &b"hi"[..]).await.unwrap();
        assert_eq!(store.size("sermons/a.mp3").await.unwrap(), 2);

        store.delete("sermons/a.mp3").await.unwrap();
        assert!(store.size("sermons/a.mp3").await.unwrap_err().is_not_found());
        assert!(store.delete("sermons/a.mp3").await.unwrap_err().is_not_found());

        assert!(matches!(
            store.create("../a.mp3", &mut &b""[..]).await,
            Err(FileStoreError::InvalidName { .. })
        ));
    }

    #[tokio::test]
    async fn local_store_contract() {
        let dir = tempdir().unwrap();
        check_contract(LocalFileStore::new(dir.path())).await;
    }

    #[tokio::test]
    async fn memory_store_contract() {
        check_contract(MemoryFileStore::new()).await;
    }
}
