// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::builder::Builder;
use crate::config::FeedConfig;
use crate::error::{StorageError, SyncError};
use crate::link::LinkInfo;
use crate::storage::Storage;

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Episodes in the remote snapshot
    pub received: usize,
    /// Pending episodes deleted because upstream dropped them
    pub removed: usize,
}

/// Bring stored state in line with the upstream feed
///
/// 1. Build the remote snapshot. A failure here returns before anything is
///    written.
/// 2. Remember which stored episodes are still pending (`New`/`Error`).
/// 3. Upsert the snapshot; existing episode records are left untouched.
/// 4. Delete pending episodes that are no longer in the snapshot.
///
/// Downloaded and cleaned episodes are history and are never deleted here.
pub async fn reconcile(
    feed: &FeedConfig,
    link: &LinkInfo,
    key: Option<&str>,
    builder: &dyn Builder,
    storage: &dyn Storage,
) -> Result<ReconcileReport, SyncError> {
    let snapshot = builder.build(feed, link, key).await?;

    let mut survivors = Vec::new();
    let walked = storage
        .walk_episodes(&feed.id, &mut |episode| {
            if episode.status.is_pending() {
                survivors.push(episode.id.clone());
            }
            Ok(())
        })
        .await;

    match walked {
        Ok(()) => {}
        // First sight of this feed
        Err(StorageError::FeedNotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    storage.add_feed(&feed.id, &snapshot).await?;

    let remote: HashSet<&str> = snapshot.episodes.iter().map(|e| e.id.as_str()).collect();

    let mut removed = 0;
    for episode_id in survivors.iter().filter(|id| !remote.contains(id.as_str())) {
        match storage.delete_episode(&feed.id, episode_id).await {
            Ok(()) => {
                debug!(feed_id = %feed.id, episode_id = %episode_id, "Removed episode dropped upstream");
                removed += 1;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        feed_id = %feed.id,
        received = snapshot.episodes.len(),
        removed,
        "Reconciled feed"
    );

    Ok(ReconcileReport {
        received: snapshot.episodes.len(),
        removed,
    })
}
