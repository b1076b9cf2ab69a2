// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{EpisodeMutator, EpisodeVisitor, FeedVisitor, Storage, apply_mutation, validate_feed_id};
use crate::error::StorageError;
use crate::model::{Episode, Feed};

struct FeedRecord {
    /// Attributes only, `episodes` stays empty
    feed: Feed,
    episodes: Vec<Episode>,
}

#[derive(Default)]
struct Inner {
    feeds: HashMap<String, FeedRecord>,
    /// Feed IDs in insertion order
    order: Vec<String>,
}

/// Non-durable storage, for tests and dry runs
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn feed_not_found(feed_id: &str) -> StorageError {
    StorageError::FeedNotFound {
        feed_id: feed_id.to_string(),
    }
}

fn episode_not_found(feed_id: &str, episode_id: &str) -> StorageError {
    StorageError::EpisodeNotFound {
        feed_id: feed_id.to_string(),
        episode_id: episode_id.to_string(),
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn add_feed(&self, feed_id: &str, feed: &Feed) -> Result<(), StorageError> {
        validate_feed_id(feed_id)?;

        let mut attributes = feed.clone();
        attributes.id = feed_id.to_string();
        attributes.episodes = Vec::new();

        let mut inner = self.lock();
        if !inner.feeds.contains_key(feed_id) {
            inner.order.push(feed_id.to_string());
        }

        let record = inner
            .feeds
            .entry(feed_id.to_string())
            .or_insert_with(|| FeedRecord {
                feed: attributes.clone(),
                episodes: Vec::new(),
            });
        record.feed = attributes;

        for episode in &feed.episodes {
            if !record.episodes.iter().any(|e| e.id == episode.id) {
                record.episodes.push(episode.clone());
            }
        }

        Ok(())
    }

    async fn get_feed(&self, feed_id: &str) -> Result<Feed, StorageError> {
        let inner = self.lock();
        let record = inner.feeds.get(feed_id).ok_or_else(|| feed_not_found(feed_id))?;

        let mut feed = record.feed.clone();
        feed.episodes = record.episodes.clone();
        Ok(feed)
    }

    async fn walk_feeds(&self, visit: &mut FeedVisitor<'_>) -> Result<(), StorageError> {
        let inner = self.lock();
        for feed_id in &inner.order {
            if let Some(record) = inner.feeds.get(feed_id) {
                visit(&record.feed)?;
            }
        }
        Ok(())
    }

    async fn walk_episodes(
        &self,
        feed_id: &str,
        visit: &mut EpisodeVisitor<'_>,
    ) -> Result<(), StorageError> {
        let inner = self.lock();
        let record = inner.feeds.get(feed_id).ok_or_else(|| feed_not_found(feed_id))?;

        for episode in &record.episodes {
            visit(episode)?;
        }
        Ok(())
    }

    async fn update_episode(
        &self,
        feed_id: &str,
        episode_id: &str,
        mutate: &mut EpisodeMutator<'_>,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let record = inner
            .feeds
            .get_mut(feed_id)
            .ok_or_else(|| feed_not_found(feed_id))?;

        let episode = record
            .episodes
            .iter_mut()
            .find(|e| e.id == episode_id)
            .ok_or_else(|| episode_not_found(feed_id, episode_id))?;

        *episode = apply_mutation(episode, mutate)?;
        Ok(())
    }

    async fn delete_episode(&self, feed_id: &str, episode_id: &str) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let record = inner
            .feeds
            .get_mut(feed_id)
            .ok_or_else(|| feed_not_found(feed_id))?;

        let position = record
            .episodes
            .iter()
            .position(|e| e.id == episode_id)
            .ok_or_else(|| episode_not_found(feed_id, episode_id))?;

        record.episodes.remove(position);
        Ok(())
    }
}
