// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::error::{CleanupError, CleanupFailure};
use crate::filename::episode_path;
use crate::filestore::FileStore;
use crate::model::{Episode, EpisodeStatus};
use crate::storage::Storage;

/// Retire downloaded episodes beyond the `keep_last` newest
///
/// Older episodes lose their blob, move to `Cleaned` and have their title and
/// description cleared. A `keep_last` of 0 disables cleanup. Every episode is
/// attempted; failures are collected into [`CleanupError::Partial`].
///
/// Returns the number of episodes cleaned.
pub async fn cleanup(
    feed: &FeedConfig,
    keep_last: usize,
    storage: &dyn Storage,
    files: &dyn FileStore,
) -> Result<usize, CleanupError> {
    if keep_last == 0 {
        return Ok(0);
    }

    let mut downloaded: Vec<Episode> = Vec::new();
    storage
        .walk_episodes(&feed.id, &mut |episode| {
            if episode.status == EpisodeStatus::Downloaded {
                downloaded.push(episode.clone());
            }
            Ok(())
        })
        .await?;

    if downloaded.len() <= keep_last {
        return Ok(0);
    }

    // Newest first; the sort is stable so equal dates keep storage order
    downloaded.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));

    let mut failures = Vec::new();
    let mut cleaned = 0;

    for episode in &downloaded[keep_last..] {
        let name = episode_path(feed, episode);

        match files.delete(&name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(feed_id = %feed.id, episode_id = %episode.id, file = %name, "Blob already gone");
            }
            Err(e) => {
                warn!(feed_id = %feed.id, episode_id = %episode.id, error = %e, "Failed to delete episode");
                failures.push(CleanupFailure::Blob {
                    episode_id: episode.id.clone(),
                    source: e,
                });
                continue;
            }
        }

        let updated = storage
            .update_episode(&feed.id, &episode.id, &mut |ep| {
                ep.status = EpisodeStatus::Cleaned;
                ep.title.clear();
                ep.description.clear();
                Ok(())
            })
            .await;

        match updated {
            Ok(()) => cleaned += 1,
            Err(e) => {
                warn!(feed_id = %feed.id, episode_id = %episode.id, error = %e, "Failed to mark episode cleaned");
                failures.push(CleanupFailure::Record {
                    episode_id: episode.id.clone(),
                    source: e,
                });
            }
        }
    }

    info!(feed_id = %feed.id, cleaned, keep_last, "Cleaned up old episodes");

    if failures.is_empty() {
        Ok(cleaned)
    } else {
        Err(CleanupError::Partial(failures))
    }
}
