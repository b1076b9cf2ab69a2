// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod json;
mod memory;

pub use json::JsonStorage;
pub use memory::MemoryStorage;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::model::{Episode, Feed};

/// Callback invoked for every feed during [`Storage::walk_feeds`]
pub type FeedVisitor<'a> = dyn FnMut(&Feed) -> Result<(), StorageError> + Send + 'a;

/// Callback invoked for every episode during [`Storage::walk_episodes`]
pub type EpisodeVisitor<'a> = dyn FnMut(&Episode) -> Result<(), StorageError> + Send + 'a;

/// Read-modify-write callback for [`Storage::update_episode`]
pub type EpisodeMutator<'a> = dyn FnMut(&mut Episode) -> Result<(), StorageError> + Send + 'a;

/// Durable feed and episode records
///
/// Every episode is its own record, so status changes never rewrite the
/// whole feed.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Upsert the feed attributes and append episodes not yet known by ID
    ///
    /// Existing episode records, including their status, are left untouched.
    async fn add_feed(&self, feed_id: &str, feed: &Feed) -> Result<(), StorageError>;

    /// Load a feed together with all of its episodes
    async fn get_feed(&self, feed_id: &str) -> Result<Feed, StorageError>;

    /// Visit the attributes of every stored feed, episodes not included
    async fn walk_feeds(&self, visit: &mut FeedVisitor<'_>) -> Result<(), StorageError>;

    /// Visit the episodes of a feed in stable insertion order
    async fn walk_episodes(
        &self,
        feed_id: &str,
        visit: &mut EpisodeVisitor<'_>,
    ) -> Result<(), StorageError>;

    /// Apply `mutate` to a single episode and persist the result
    ///
    /// Status changes must follow the episode state machine, and the ID can't
    /// change.
    async fn update_episode(
        &self,
        feed_id: &str,
        episode_id: &str,
        mutate: &mut EpisodeMutator<'_>,
    ) -> Result<(), StorageError>;

    async fn delete_episode(&self, feed_id: &str, episode_id: &str) -> Result<(), StorageError>;
}

/// A shared reference to a storage backend
pub type SharedStorage = Arc<dyn Storage>;

/// Run a mutator against a copy of `episode`, rejecting illegal changes
fn apply_mutation(
    episode: &Episode,
    mutate: &mut EpisodeMutator<'_>,
) -> Result<Episode, StorageError> {
    let mut updated = episode.clone();
    mutate(&mut updated)?;

    if updated.id != episode.id {
        return Err(StorageError::InvalidId(updated.id));
    }
    if updated.status != episode.status && !episode.status.can_become(updated.status) {
        return Err(StorageError::InvalidTransition {
            episode_id: episode.id.clone(),
            from: episode.status,
            to: updated.status,
        });
    }

    Ok(updated)
}

/// Feed IDs name directories, so keep them to a single safe path component
fn validate_feed_id(feed_id: &str) -> Result<(), StorageError> {
    let valid = !feed_id.is_empty()
        && feed_id != "."
        && feed_id != ".."
        && !feed_id.contains(['/', '\\', '\0']);

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidId(feed_id.to_string()))
    }
}
