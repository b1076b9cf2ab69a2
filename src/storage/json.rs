// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use super::{EpisodeMutator, EpisodeVisitor, FeedVisitor, Storage, apply_mutation, validate_feed_id};
use crate::error::StorageError;
use crate::model::{Episode, Feed};

const FEED_FILE: &str = "feed.json";
const EPISODES_DIR: &str = "episodes";

/// On-disk feed record: attributes plus the episode order
#[derive(Debug, Serialize, Deserialize)]
struct FeedRecord {
    feed: Feed,
    episode_ids: Vec<String>,
}

/// Durable storage as a tree of JSON files
///
/// ```text
/// <root>/<feed_id>/feed.json
/// <root>/<feed_id>/episodes/<sha256(episode_id)>.json
/// ```
///
/// Each episode is its own file, so a status change rewrites a single record.
/// Files are replaced atomically through a temporary file and a rename.
pub struct JsonStorage {
    root: PathBuf,
    lock: Mutex<()>,
}

impl JsonStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    fn feed_dir(&self, feed_id: &str) -> PathBuf {
        self.root.join(feed_id)
    }

    fn feed_path(&self, feed_id: &str) -> PathBuf {
        self.feed_dir(feed_id).join(FEED_FILE)
    }

    fn episode_path(&self, feed_id: &str, episode_id: &str) -> PathBuf {
        let digest = Sha256::digest(episode_id.as_bytes());
        self.feed_dir(feed_id)
            .join(EPISODES_DIR)
            .join(format!("{digest:x}.json"))
    }

    async fn load_record(&self, feed_id: &str) -> Result<FeedRecord, StorageError> {
        validate_feed_id(feed_id)?;
        read_json(&self.feed_path(feed_id))
            .await?
            .ok_or_else(|| StorageError::FeedNotFound {
                feed_id: feed_id.to_string(),
            })
    }

    async fn load_episode(&self, feed_id: &str, episode_id: &str) -> Result<Episode, StorageError> {
        read_json(&self.episode_path(feed_id, episode_id))
            .await?
            .ok_or_else(|| StorageError::EpisodeNotFound {
                feed_id: feed_id.to_string(),
                episode_id: episode_id.to_string(),
            })
    }

    async fn load_episodes(
        &self,
        feed_id: &str,
        record: &FeedRecord,
    ) -> Result<Vec<Episode>, StorageError> {
        let mut episodes = Vec::with_capacity(record.episode_ids.len());
        for episode_id in &record.episode_ids {
            episodes.push(self.load_episode(feed_id, episode_id).await?);
        }
        Ok(episodes)
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn add_feed(&self, feed_id: &str, feed: &Feed) -> Result<(), StorageError> {
        validate_feed_id(feed_id)?;
        let _guard = self.lock.lock().await;

        let mut episode_ids = match read_json::<FeedRecord>(&self.feed_path(feed_id)).await? {
            Some(existing) => existing.episode_ids,
            None => Vec::new(),
        };

        let mut added = 0;
        for episode in &feed.episodes {
            if episode_ids.contains(&episode.id) {
                continue;
            }
            write_json(&self.episode_path(feed_id, &episode.id), episode).await?;
            episode_ids.push(episode.id.clone());
            added += 1;
        }

        let mut attributes = feed.clone();
        attributes.id = feed_id.to_string();
        attributes.episodes = Vec::new();

        let record = FeedRecord {
            feed: attributes,
            episode_ids,
        };
        write_json(&self.feed_path(feed_id), &record).await?;

        debug!(feed_id, added, "Stored feed");
        Ok(())
    }

    async fn get_feed(&self, feed_id: &str) -> Result<Feed, StorageError> {
        let _guard = self.lock.lock().await;

        let record = self.load_record(feed_id).await?;
        let episodes = self.load_episodes(feed_id, &record).await?;

        let mut feed = record.feed;
        feed.episodes = episodes;
        Ok(feed)
    }

    async fn walk_feeds(&self, visit: &mut FeedVisitor<'_>) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;

        let mut feed_ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(read_failed(&self.root, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| read_failed(&self.root, e))?
        {
            let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
            if let Some(name) = entry.file_name().to_str()
                && is_dir
                && validate_feed_id(name).is_ok()
            {
                feed_ids.push(name.to_string());
            }
        }
        feed_ids.sort();

        for feed_id in feed_ids {
            if let Some(record) = read_json::<FeedRecord>(&self.feed_path(&feed_id)).await? {
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
        let _guard = self.lock.lock().await;

        let record = self.load_record(feed_id).await?;
        for episode_id in &record.episode_ids {
            let episode = self.load_episode(feed_id, episode_id).await?;
            visit(&episode)?;
        }
        Ok(())
    }

    async fn update_episode(
        &self,
        feed_id: &str,
        episode_id: &str,
        mutate: &mut EpisodeMutator<'_>,
    ) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;

        let record = self.load_record(feed_id).await?;
        if !record.episode_ids.iter().any(|id| id == episode_id) {
            return Err(StorageError::EpisodeNotFound {
                feed_id: feed_id.to_string(),
                episode_id: episode_id.to_string(),
            });
        }

        let episode = self.load_episode(feed_id, episode_id).await?;
        let updated = apply_mutation(&episode, mutate)?;
        write_json(&self.episode_path(feed_id, episode_id), &updated).await
    }

    async fn delete_episode(&self, feed_id: &str, episode_id: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;

        let mut record = self.load_record(feed_id).await?;
        let Some(position) = record.episode_ids.iter().position(|id| id == episode_id) else {
            return Err(StorageError::EpisodeNotFound {
                feed_id: feed_id.to_string(),
                episode_id: episode_id.to_string(),
            });
        };

        // Drop the reference first so a crash never leaves a dangling ID
        record.episode_ids.remove(position);
        write_json(&self.feed_path(feed_id), &record).await?;

        let path = self.episode_path(feed_id, episode_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::WriteFailed { path, source: e }),
        }
    }
}

fn read_failed(path: &Path, source: io::Error) -> StorageError {
    StorageError::ReadFailed {
        path: path.to_path_buf(),
        source,
    }
}

/// Read and parse a JSON file, `None` if it doesn't exist
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(read_failed(path, e)),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StorageError::JsonParseFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Atomically replace `path` with the JSON form of `value`
///
/// Identical content is not rewritten.
async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value)?;

    if let Ok(existing) = tokio::fs::read(path).await
        && existing == bytes
    {
        return Ok(());
    }

    let write_failed = |e: io::Error| StorageError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &bytes).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)
}
