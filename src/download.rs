// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::downloader::SharedDownloader;
use crate::error::StorageError;
use crate::filename::episode_path;
use crate::filestore::SharedFileStore;
use crate::model::{Episode, EpisodeStatus};
use crate::storage::SharedStorage;

/// Outcome of one download pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// Episodes now stored, including blobs that were already present
    pub downloaded: usize,
    /// Episodes marked as `Error`
    pub failed: usize,
    /// Upstream asked us to back off; remaining candidates were not attempted
    pub rate_limited: bool,
}

enum Outcome {
    Downloaded,
    Failed,
    RateLimited,
    Skipped,
}

/// Everything a single download task needs
#[derive(Clone)]
struct Collaborators {
    feed: Arc<FeedConfig>,
    downloader: SharedDownloader,
    files: SharedFileStore,
    storage: SharedStorage,
    /// Cycle-wide stop signal, raised on rate limiting and storage failures
    abort: Arc<AtomicBool>,
}

/// Download every candidate in order through a bounded slot pool
///
/// With `max_concurrent == 1` candidates are processed strictly one after the
/// other. A rate-limited response stops the pass: no further candidate is
/// dispatched and the ones left keep their status. Any other download
/// failure only marks that episode as `Error`.
///
/// A storage failure is fatal for the pass and returned to the caller.
pub async fn download_pending(
    feed: &FeedConfig,
    candidates: Vec<Episode>,
    downloader: SharedDownloader,
    files: SharedFileStore,
    storage: SharedStorage,
    max_concurrent: usize,
) -> Result<DownloadReport, StorageError> {
    let max_concurrent = max_concurrent.max(1);
    let ctx = Collaborators {
        feed: Arc::new(feed.clone()),
        downloader,
        files,
        storage,
        abort: Arc::new(AtomicBool::new(false)),
    };

    // The slot pool limits concurrency and hands out stable slot IDs for logging
    let (slot_tx, mut slot_rx) = mpsc::channel(max_concurrent);
    for slot in 0..max_concurrent {
        let _ = slot_tx.send(slot).await;
    }

    let total = candidates.len();
    let mut tasks = JoinSet::new();

    for (index, episode) in candidates.into_iter().enumerate() {
        if ctx.abort.load(Ordering::SeqCst) {
            break;
        }

        // Acquire a slot BEFORE spawning so episodes start in order
        let Some(slot) = slot_rx.recv().await else {
            break;
        };

        // The flag may have been raised while we waited for the slot
        if ctx.abort.load(Ordering::SeqCst) {
            let _ = slot_tx.send(slot).await;
            break;
        }

        debug!(feed_id = %feed.id, episode_id = %episode.id, index, total, slot, "Dispatching download");

        let ctx = ctx.clone();
        let slot_tx = slot_tx.clone();
        tasks.spawn(async move {
            let result = process_episode(&ctx, &episode).await;
            if !matches!(result, Ok(Outcome::Downloaded | Outcome::Failed | Outcome::Skipped)) {
                ctx.abort.store(true, Ordering::SeqCst);
            }

            // Return slot to the pool when done
            let _ = slot_tx.send(slot).await;
            result
        });
    }

    let mut report = DownloadReport::default();
    let mut fatal = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(Outcome::Downloaded)) => report.downloaded += 1,
            Ok(Ok(Outcome::Failed)) => report.failed += 1,
            Ok(Ok(Outcome::RateLimited)) => report.rate_limited = true,
            Ok(Ok(Outcome::Skipped)) => {}
            Ok(Err(e)) => {
                fatal.get_or_insert(e);
            }
            Err(e) => warn!(feed_id = %feed.id, error = %e, "Download task failed"),
        }
    }

    if let Some(e) = fatal {
        return Err(e);
    }

    if report.rate_limited {
        info!(feed_id = %feed.id, "Rate limited, remaining downloads deferred to the next update");
    }

    Ok(report)
}

async fn process_episode(ctx: &Collaborators, episode: &Episode) -> Result<Outcome, StorageError> {
    let feed = ctx.feed.as_ref();
    let name = episode_path(feed, episode);

    match ctx.files.size(&name).await {
        Ok(size) => {
            debug!(feed_id = %feed.id, episode_id = %episode.id, size, "Episode already stored");
            mark(ctx, episode, EpisodeStatus::Downloaded, size).await?;
            return Ok(Outcome::Downloaded);
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => {
            warn!(feed_id = %feed.id, episode_id = %episode.id, error = %e, "Failed to check file store");
            mark(ctx, episode, EpisodeStatus::Error, episode.size).await?;
            return Ok(Outcome::Failed);
        }
    }

    // Another task may have hit the rate limit while this one was checking the store
    if ctx.abort.load(Ordering::SeqCst) {
        return Ok(Outcome::Skipped);
    }

    let mut stream = match ctx.downloader.download(feed, episode).await {
        Ok(stream) => stream,
        Err(e) if e.is_rate_limited() => {
            ctx.abort.store(true, Ordering::SeqCst);
            info!(feed_id = %feed.id, episode_id = %episode.id, "Too many requests");
            return Ok(Outcome::RateLimited);
        }
        Err(e) => {
            warn!(feed_id = %feed.id, episode_id = %episode.id, error = %e, "Download failed");
            mark(ctx, episode, EpisodeStatus::Error, episode.size).await?;
            return Ok(Outcome::Failed);
        }
    };

    let created = ctx.files.create(&name, &mut *stream).await;
    drop(stream);

    match created {
        Ok(size) => {
            info!(feed_id = %feed.id, episode_id = %episode.id, size, file = %name, "Downloaded episode");
            mark(ctx, episode, EpisodeStatus::Downloaded, size).await?;
            Ok(Outcome::Downloaded)
        }
        Err(e) => {
            warn!(feed_id = %feed.id, episode_id = %episode.id, error = %e, "Failed to store episode");
            mark(ctx, episode, EpisodeStatus::Error, episode.size).await?;
            Ok(Outcome::Failed)
        }
    }
}

async fn mark(
    ctx: &Collaborators,
    episode: &Episode,
    status: EpisodeStatus,
    size: u64,
) -> Result<(), StorageError> {
    let result = ctx
        .storage
        .update_episode(&ctx.feed.id, &episode.id, &mut |ep| {
            ep.status = status;
            ep.size = size;
            Ok(())
        })
        .await;

    if let Err(e) = &result {
        warn!(feed_id = %ctx.feed.id, episode_id = %episode.id, error = %e, "Failed to update episode");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FileStoreError;
    use crate::filestore::{FileStore, MemoryFileStore};
    use crate::storage::{MemoryStorage, Storage};
    use crate::testing::{Outcome as Script, ScriptedDownloader, episode, snapshot};
    use async_trait::async_trait;
    use tokio::io::AsyncRead;

    fn feed_config() -> FeedConfig {
        FeedConfig::new("podcast", "https://example.com/podcast.xml")
    }

    async fn seeded_storage(ids: &[&str]) -> (Arc<MemoryStorage>, Vec<Episode>) {
        let episodes: Vec<Episode> = ids.iter().map(|id| episode(id, id)).collect();
        let storage = Arc::new(MemoryStorage::new());
        storage
            .add_feed("podcast", &snapshot("podcast", episodes.clone()))
            .await
            .unwrap();
        (storage, episodes)
    }

    async fn statuses(storage: &MemoryStorage) -> Vec<EpisodeStatus> {
        let feed = storage.get_feed("podcast").await.unwrap();
        feed.episodes.iter().map(|e| e.status).collect()
    }

    fn count(statuses: &[EpisodeStatus], status: EpisodeStatus) -> usize {
        statuses.iter().filter(|s| **s == status).count()
    }

    #[tokio::test]
    async fn rate_limit_stops_the_pass() {
        let (storage, candidates) = seeded_storage(&["1", "2", "3", "4", "5"]).await;
        let downloader = Arc::new(ScriptedDownloader::new().with("2", Script::RateLimited));
        let files = Arc::new(MemoryFileStore::new());

        let report = download_pending(
            &feed_config(),
            candidates,
            downloader.clone(),
            files,
            storage.clone(),
            1,
        )
        .await
        .unwrap();

        assert!(report.rate_limited);
        assert_eq!(downloader.calls(), ["1", "2"]);

        let statuses = statuses(&storage).await;
        assert_eq!(count(&statuses, EpisodeStatus::Downloaded), 1);
        assert_eq!(count(&statuses, EpisodeStatus::Error), 0);
        assert_eq!(count(&statuses, EpisodeStatus::New), 4);
    }

    #[tokio::test]
    async fn rate_limit_stops_parallel_dispatch() {
        let ids: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let (storage, candidates) = seeded_storage(&id_refs).await;
        let downloader = Arc::new(ScriptedDownloader::new().with("0", Script::RateLimited));

        let report = download_pending(
            &feed_config(),
            candidates,
            downloader.clone(),
            Arc::new(MemoryFileStore::new()),
            storage.clone(),
            3,
        )
        .await
        .unwrap();

        assert!(report.rate_limited);
        // At most the slots handed out before the first result came back
        assert!(downloader.calls().len() <= 3);
        assert_eq!(count(&statuses(&storage).await, EpisodeStatus::Error), 0);
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let (storage, candidates) = seeded_storage(&["1", "2", "3"]).await;
        let downloader = Arc::new(ScriptedDownloader::new().with("2", Script::Fail));
        let files = Arc::new(MemoryFileStore::new());

        let report = download_pending(
            &feed_config(),
            candidates,
            downloader,
            files.clone(),
            storage.clone(),
            1,
        )
        .await
        .unwrap();

        assert_eq!(
            report,
            DownloadReport {
                downloaded: 2,
                failed: 1,
                rate_limited: false
            }
        );
        assert_eq!(
            statuses(&storage).await,
            [
                EpisodeStatus::Downloaded,
                EpisodeStatus::Error,
                EpisodeStatus::Downloaded
            ]
        );
        assert_eq!(files.get("podcast/1.mp4"), Some(b"media:1".to_vec()));

        let feed = storage.get_feed("podcast").await.unwrap();
        assert_eq!(feed.episodes[0].size, 7);
    }

    #[tokio::test]
    async fn slots_are_reused_until_every_candidate_ran() {
        let ids: Vec<String> = (0..8).map(|i| i.to_string()).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let (storage, candidates) = seeded_storage(&id_refs).await;
        let downloader = Arc::new(ScriptedDownloader::new());
        let files = Arc::new(MemoryFileStore::new());

        let report = download_pending(
            &feed_config(),
            candidates,
            downloader.clone(),
            files.clone(),
            storage.clone(),
            3,
        )
        .await
        .unwrap();

        assert_eq!(report.downloaded, 8);
        assert!(!report.rate_limited);

        let mut calls = downloader.calls();
        calls.sort();
        assert_eq!(calls, ids);
        assert_eq!(files.names().len(), 8);
        assert_eq!(count(&statuses(&storage).await, EpisodeStatus::Downloaded), 8);
    }

    #[tokio::test]
    async fn existing_blob_skips_the_downloader() {
        let (storage, candidates) = seeded_storage(&["1"]).await;
        let downloader = Arc::new(ScriptedDownloader::new());
        let files = Arc::new(MemoryFileStore::new());
        files
            .create("podcast/1.mp4", &mut &b"already here"[..])
            .await
            .unwrap();

        let report = download_pending(
            &feed_config(),
            candidates,
            downloader.clone(),
            files,
            storage.clone(),
            1,
        )
        .await
        .unwrap();

        assert_eq!(report.downloaded, 1);
        assert!(downloader.calls().is_empty());

        let feed = storage.get_feed("podcast").await.unwrap();
        assert_eq!(feed.episodes[0].status, EpisodeStatus::Downloaded);
        assert_eq!(feed.episodes[0].size, 12);
    }

    #[tokio::test]
    async fn failed_episodes_are_retried() {
        let (storage, candidates) = seeded_storage(&["1"]).await;
        let files = Arc::new(MemoryFileStore::new());

        let failing = Arc::new(ScriptedDownloader::new().with("1", Script::Fail));
        download_pending(
            &feed_config(),
            candidates.clone(),
            failing,
            files.clone(),
            storage.clone(),
            1,
        )
        .await
        .unwrap();
        assert_eq!(statuses(&storage).await, [EpisodeStatus::Error]);

        let working = Arc::new(ScriptedDownloader::new());
        download_pending(&feed_config(), candidates, working, files, storage.clone(), 1)
            .await
            .unwrap();
        assert_eq!(statuses(&storage).await, [EpisodeStatus::Downloaded]);
    }

    /// A store whose writes always fail
    struct BrokenFileStore;

    #[async_trait]
    impl FileStore for BrokenFileStore {
        async fn create(
            &self,
            name: &str,
            _reader: &mut (dyn AsyncRead + Send + Unpin),
        ) -> Result<u64, FileStoreError> {
            Err(FileStoreError::Io {
                name: name.to_string(),
                source: std::io::Error::other("disk full"),
            })
        }

        async fn size(&self, name: &str) -> Result<u64, FileStoreError> {
            Err(FileStoreError::NotFound {
                name: name.to_string(),
            })
        }

        async fn delete(&self, _name: &str) -> Result<(), FileStoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn store_failure_marks_episode_error() {
        let (storage, candidates) = seeded_storage(&["1", "2"]).await;

        let report = download_pending(
            &feed_config(),
            candidates,
            Arc::new(ScriptedDownloader::new()),
            Arc::new(BrokenFileStore),
            storage.clone(),
            1,
        )
        .await
        .unwrap();

        assert_eq!(report.failed, 2);
        assert_eq!(
            statuses(&storage).await,
            [EpisodeStatus::Error, EpisodeStatus::Error]
        );
    }

    #[tokio::test]
    async fn storage_failure_is_fatal() {
        // Candidates that were never stored can't be updated
        let storage = Arc::new(MemoryStorage::new());
        let downloader = Arc::new(ScriptedDownloader::new());

        let err = download_pending(
            &feed_config(),
            vec![episode("1", "One"), episode("2", "Two")],
            downloader.clone(),
            Arc::new(MemoryFileStore::new()),
            storage,
            1,
        )
        .await
        .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(downloader.calls(), ["1"]);
    }
}
