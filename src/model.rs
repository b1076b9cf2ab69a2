// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a persisted episode
///
/// ```text
/// New ──► Downloaded ──► Cleaned
///  │          ▲
///  ▼          │
/// Error ──────┘
/// ```
///
/// Nothing ever moves back to `New`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    #[default]
    New,
    Downloaded,
    Error,
    Cleaned,
}

impl EpisodeStatus {
    /// Episodes still waiting for a successful download
    pub fn is_pending(self) -> bool {
        matches!(self, Self::New | Self::Error)
    }

    /// Downloaded or cleaned episodes are history and survive reconciliation
    pub fn is_durable(self) -> bool {
        matches!(self, Self::Downloaded | Self::Cleaned)
    }

    /// Whether `next` is a legal successor of this status
    pub fn can_become(self, next: EpisodeStatus) -> bool {
        use EpisodeStatus::*;

        matches!(
            (self, next),
            (New, Downloaded) | (New, Error) | (Error, Downloaded) | (Error, Error) | (Downloaded, Cleaned)
        )
    }
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Downloaded => "downloaded",
            Self::Error => "error",
            Self::Cleaned => "cleaned",
        };
        f.write_str(name)
    }
}

/// Quality to use when downloading episodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    High,
    Low,
}

/// Media format episodes are converted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Audio,
    #[default]
    Video,
}

impl Format {
    /// File extension used for episode blobs
    pub fn extension(self) -> &'static str {
        match self {
            Self::Audio => "mp3",
            Self::Video => "mp4",
        }
    }

    /// MIME type announced in feed enclosures
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Audio => "audio/mpeg",
            Self::Video => "video/mp4",
        }
    }
}

/// Upstream platform a feed is sourced from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Youtube,
    Vimeo,
    Soundcloud,
    Rss,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Vimeo => "vimeo",
            Self::Soundcloud => "soundcloud",
            Self::Rss => "rss",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "youtube" => Ok(Self::Youtube),
            "vimeo" => Ok(Self::Vimeo),
            "soundcloud" => Ok(Self::Soundcloud),
            "rss" => Ok(Self::Rss),
            other => Err(format!("unknown provider {other:?}")),
        }
    }
}

/// Kind of upstream collection a link points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Channel,
    Playlist,
    User,
    Group,
    Feed,
}

/// A single episode, persisted as its own record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Unique within the owning feed
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumbnail: String,
    /// Duration in seconds
    #[serde(default)]
    pub duration: u64,
    pub video_url: String,
    pub pub_date: DateTime<Utc>,
    /// Size in bytes; the enclosure length until downloaded, the blob size afterwards
    #[serde(default)]
    pub size: u64,
    /// Upstream ordering hint
    #[serde(default)]
    pub order: String,
    #[serde(default)]
    pub status: EpisodeStatus,
}

/// Feed attributes plus a transient view of its episodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: String,
    /// Channel, playlist or user identifier on the upstream platform
    pub item_id: String,
    pub provider: Provider,
    pub link_type: LinkType,
    pub format: Format,
    pub quality: Quality,
    pub page_size: usize,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    /// Platform specific URL of the source
    #[serde(default)]
    pub item_url: String,
    #[serde(default)]
    pub cover_art: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default)]
    pub pub_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Never serialized as part of the feed record
    #[serde(skip)]
    pub episodes: Vec<Episode>,
}
