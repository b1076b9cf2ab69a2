// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{FileStore, validate_name};
use crate::error::FileStoreError;

/// Blobs kept in memory
#[derive(Default)]
pub struct MemoryFileStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Content of a blob, if present
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().get(name).cloned()
    }

    /// Names of all stored blobs, sorted
    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn create(
        &self,
        name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, FileStoreError> {
        validate_name(name)?;

        let mut content = Vec::new();
        let written = reader
            .read_to_end(&mut content)
            .await
            .map_err(|e| FileStoreError::Io {
                name: name.to_string(),
                source: e,
            })?;

        self.lock().insert(name.to_string(), content);
        Ok(written as u64)
    }

    async fn size(&self, name: &str) -> Result<u64, FileStoreError> {
        validate_name(name)?;
        self.lock()
            .get(name)
            .map(|content| content.len() as u64)
            .ok_or_else(|| FileStoreError::NotFound {
                name: name.to_string(),
            })
    }

    async fn delete(&self, name: &str) -> Result<(), FileStoreError> {
        validate_name(name)?;
        self.lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| FileStoreError::NotFound {
                name: name.to_string(),
            })
    }
}
