// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt};

use super::{FileStore, validate_name};
use crate::error::FileStoreError;

/// Suffix for blobs still being written
const PARTIAL_SUFFIX: &str = ".partial";

/// Blobs as files below a data directory, served as-is by a web server
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, FileStoreError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

fn io_error(name: &str, source: io::Error) -> FileStoreError {
    if source.kind() == io::ErrorKind::NotFound {
        FileStoreError::NotFound {
            name: name.to_string(),
        }
    } else {
        FileStoreError::Io {
            name: name.to_string(),
            source,
        }
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn create(
        &self,
        name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, FileStoreError> {
        let path = self.path_for(name)?;
        let io_failed = |source: io::Error| FileStoreError::Io {
            name: name.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_failed)?;
        }

        // Write next to the target, then rename so readers never see partial content
        let mut partial = path.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);

        let result = async {
            let mut file = File::create(&partial).await?;
            let written = tokio::io::copy(reader, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, io::Error>(written)
        }
        .await;

        let written = match result {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(io_failed(e));
            }
        };

        tokio::fs::rename(&partial, &path).await.map_err(io_failed)?;
        Ok(written)
    }

    async fn size(&self, name: &str) -> Result<u64, FileStoreError> {
        let path = self.path_for(name)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| io_error(name, e))?;

        if !metadata.is_file() {
            return Err(FileStoreError::NotFound {
                name: name.to_string(),
            });
        }
        Ok(metadata.len())
    }

    async fn delete(&self, name: &str) -> Result<(), FileStoreError> {
        let path = self.path_for(name)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| io_error(name, e))
    }
}
