// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod builder;
pub mod cleanup;
pub mod config;
pub mod download;
pub mod downloader;
pub mod error;
pub mod filename;
pub mod filestore;
pub mod filter;
pub mod http;
pub mod key;
pub mod link;
pub mod model;
pub mod publish;
pub mod reconcile;
pub mod scheduler;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use builder::{Builder, RssBuilder};
pub use config::{Config, FeedConfig};
pub use downloader::{Downloader, HttpDownloader};
pub use error::{
    BuildError, CleanupError, ConfigError, DownloadError, FileStoreError, PublishError,
    StorageError, SyncError,
};
pub use filestore::{FileStore, LocalFileStore};
pub use http::{HttpClient, ReqwestClient};
pub use key::{KeyProvider, new_key_provider};
pub use model::{Episode, EpisodeStatus, Feed, Provider};
pub use scheduler::Updater;
pub use storage::{JsonStorage, Storage};
pub use sync::{CycleReport, SyncManager, SyncOptions};
