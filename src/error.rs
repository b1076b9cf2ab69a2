// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::{EpisodeStatus, Provider};

/// Errors that can occur while loading the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid duration '{0}' (expected e.g. \"90s\", \"30m\", \"1h30m\")")]
    InvalidDuration(String),

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Errors that can occur when parsing a feed URL
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Failed to parse URL {link}: {source}")]
    ParseFailed {
        link: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Unsupported link {link}: {reason}")]
    Unsupported { link: String, reason: String },
}

/// Errors that can occur when creating a key provider
#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("No API keys provided")]
    NoKeys,

    #[error("API key can't be empty")]
    EmptyKey,

    #[error("At least 2 keys required for rotation (got {0})")]
    NotEnoughKeys(usize),
}

/// Errors that can occur while building a remote feed snapshot
#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("No builder registered for provider {0}")]
    UnsupportedProvider(Provider),

    #[error("Failed to fetch {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to parse RSS feed: {0}")]
    ParseFailed(#[from] rss::Error),

    #[error("Upstream query limit is exceeded")]
    QuotaExceeded,
}

/// Errors that can occur during episode downloads
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Upstream refuses further requests for now; the whole download phase backs off
    #[error("Too many requests")]
    RateLimited,

    #[error("HTTP request failed for {url}: {source}")]
    HttpFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Stream error while downloading {url}: {source}")]
    StreamFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to stage download at {path}: {source}")]
    StagingFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// Errors raised by the persistence backend
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Feed {feed_id} not found")]
    FeedNotFound { feed_id: String },

    #[error("Episode {episode_id} not found in feed {feed_id}")]
    EpisodeNotFound { feed_id: String, episode_id: String },

    #[error("Invalid identifier '{0}'")]
    InvalidId(String),

    #[error("Episode {episode_id} can't move from {from} to {to}")]
    InvalidTransition {
        episode_id: String,
        from: EpisodeStatus,
        to: EpisodeStatus,
    },

    #[error("Failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON in {path}: {source}")]
    JsonParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize record: {0}")]
    JsonSerializeFailed(#[from] serde_json::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::FeedNotFound { .. } | Self::EpisodeNotFound { .. }
        )
    }
}

/// Errors raised by the blob store
#[derive(Error, Debug)]
pub enum FileStoreError {
    #[error("File {name} does not exist")]
    NotFound { name: String },

    #[error("Invalid file name '{name}'")]
    InvalidName { name: String },

    #[error("I/O error on {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl FileStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// A single episode the cleaner failed to retire
#[derive(Error, Debug)]
pub enum CleanupFailure {
    #[error("failed to delete episode {episode_id}: {source}")]
    Blob {
        episode_id: String,
        #[source]
        source: FileStoreError,
    },

    #[error("failed to set state for cleaned episode {episode_id}: {source}")]
    Record {
        episode_id: String,
        #[source]
        source: StorageError,
    },
}

/// Errors produced by the retention pass
#[derive(Error, Debug)]
pub enum CleanupError {
    #[error("Failed to list downloaded episodes: {0}")]
    Storage(#[from] StorageError),

    #[error("{} episode(s) could not be cleaned: {}", .0.len(), join_failures(.0))]
    Partial(Vec<CleanupFailure>),
}

fn join_failures(failures: &[CleanupFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur while publishing feed documents
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to load feed state: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to render feed {feed_id}: {source}")]
    RenderFailed {
        feed_id: String,
        #[source]
        source: rss::Error,
    },

    #[error("Failed to upload {name}: {source}")]
    UploadFailed {
        name: String,
        #[source]
        source: FileStoreError,
    },
}

/// Top-level errors for a feed update cycle
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Update failed: {0}")]
    Build(#[from] BuildError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_partial_lists_every_failure() {
        let err = CleanupError::Partial(vec![
            CleanupFailure::Blob {
                episode_id: "a".to_string(),
                source: FileStoreError::InvalidName {
                    name: "../a".to_string(),
                },
            },
            CleanupFailure::Record {
                episode_id: "b".to_string(),
                source: StorageError::EpisodeNotFound {
                    feed_id: "f".to_string(),
                    episode_id: "b".to_string(),
                },
            },
        ]);

        let message = err.to_string();
        assert!(message.starts_with("2 episode(s) could not be cleaned"));
        assert!(message.contains("failed to delete episode a"));
        assert!(message.contains("failed to set state for cleaned episode b"));
    }

    #[test]
    fn invalid_config_joins_problems() {
        let err = ConfigError::Invalid(vec!["one".to_string(), "two".to_string()]);
        assert_eq!(err.to_string(), "Invalid configuration: one; two");
    }

    #[test]
    fn rate_limited_is_distinguishable() {
        assert!(DownloadError::RateLimited.is_rate_limited());
        assert!(
            !DownloadError::HttpStatus {
                url: "https://example.com".to_string(),
                status: 500
            }
            .is_rate_limited()
        );
    }
}
