// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;

use tracing::{error, info, instrument};

use crate::builder::SharedBuilder;
use crate::cleanup::cleanup;
use crate::config::FeedConfig;
use crate::download::download_pending;
use crate::downloader::SharedDownloader;
use crate::error::{BuildError, SyncError};
use crate::filestore::SharedFileStore;
use crate::filter::select_candidates;
use crate::key::SharedKeyProvider;
use crate::link::parse_link;
use crate::model::{Episode, Provider};
use crate::publish::{publish_feed, publish_opml};
use crate::reconcile::reconcile;
use crate::storage::SharedStorage;

/// Options for feed synchronization
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Public base URL episode enclosures and OPML entries point at
    pub hostname: String,
    /// Retention for feeds without their own `keep_last` (0 = keep everything)
    pub default_keep_last: usize,
    /// Maximum number of concurrent downloads within one feed update
    pub max_concurrent_downloads: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            hostname: "http://localhost".to_string(),
            default_keep_last: 0,
            max_concurrent_downloads: 1,
        }
    }
}

/// Result of one update cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Episodes in the remote snapshot
    pub received: usize,
    /// Pending episodes deleted because they vanished upstream
    pub removed: usize,
    /// Episodes downloaded (or found already stored) this cycle
    pub downloaded: usize,
    /// Episodes that failed to download this cycle
    pub failed: usize,
    /// Downloads were cut short by upstream rate limiting
    pub rate_limited: bool,
    /// Episodes retired by the retention policy
    pub cleaned: usize,
}

/// Runs the update cycle for one feed at a time
///
/// Reconcile, select and download, clean up, then publish the feed document
/// and the OPML index. A failed reconcile aborts the cycle and leaves the
/// previously published document in place.
pub struct SyncManager {
    storage: SharedStorage,
    files: SharedFileStore,
    downloader: SharedDownloader,
    builders: HashMap<Provider, SharedBuilder>,
    keys: HashMap<Provider, SharedKeyProvider>,
    /// Every configured feed, for the OPML index
    feeds: Vec<FeedConfig>,
    options: SyncOptions,
}

impl SyncManager {
    pub fn new(
        storage: SharedStorage,
        files: SharedFileStore,
        downloader: SharedDownloader,
        feeds: Vec<FeedConfig>,
        options: SyncOptions,
    ) -> Self {
        Self {
            storage,
            files,
            downloader,
            builders: HashMap::new(),
            keys: HashMap::new(),
            feeds,
            options,
        }
    }

    /// Register the builder used for feeds of `provider`
    pub fn with_builder(mut self, provider: Provider, builder: SharedBuilder) -> Self {
        self.builders.insert(provider, builder);
        self
    }

    /// Register the API keys handed to `provider`'s builder
    pub fn with_keys(mut self, provider: Provider, keys: SharedKeyProvider) -> Self {
        self.keys.insert(provider, keys);
        self
    }

    /// Run one full update cycle for `feed`
    #[instrument(skip_all, fields(feed_id = %feed.id))]
    pub async fn update(&self, feed: &FeedConfig) -> Result<CycleReport, SyncError> {
        info!(url = %feed.url, "Updating feed");

        let link = parse_link(&feed.url).map_err(BuildError::from)?;
        let builder = self
            .builders
            .get(&link.provider)
            .ok_or(BuildError::UnsupportedProvider(link.provider))?;
        let key = self.keys.get(&link.provider).map(|keys| keys.get());

        let reconciled = reconcile(
            feed,
            &link,
            key.as_deref(),
            builder.as_ref(),
            self.storage.as_ref(),
        )
        .await?;

        let mut persisted: Vec<Episode> = Vec::new();
        self.storage
            .walk_episodes(&feed.id, &mut |episode| {
                persisted.push(episode.clone());
                Ok(())
            })
            .await?;

        let candidates = select_candidates(persisted, &feed.filters, feed.page_size);
        info!(candidates = candidates.len(), "Selected episodes to download");

        let downloads = download_pending(
            feed,
            candidates,
            self.downloader.clone(),
            self.files.clone(),
            self.storage.clone(),
            self.options.max_concurrent_downloads,
        )
        .await?;

        let keep_last = feed
            .clean
            .keep_last
            .unwrap_or(self.options.default_keep_last);
        let cleaned = match cleanup(feed, keep_last, self.storage.as_ref(), self.files.as_ref()).await {
            Ok(cleaned) => cleaned,
            Err(e) => {
                error!(error = %e, "Cleanup failed");
                0
            }
        };

        publish_feed(
            feed,
            &self.options.hostname,
            self.storage.as_ref(),
            self.files.as_ref(),
        )
        .await?;

        publish_opml(
            &self.feeds,
            &self.options.hostname,
            self.storage.as_ref(),
            self.files.as_ref(),
        )
        .await?;

        let report = CycleReport {
            received: reconciled.received,
            removed: reconciled.removed,
            downloaded: downloads.downloaded,
            failed: downloads.failed,
            rate_limited: downloads.rate_limited,
            cleaned,
        };

        info!(
            downloaded = report.downloaded,
            failed = report.failed,
            cleaned = report.cleaned,
            "Feed updated"
        );

        Ok(report)
    }
}
