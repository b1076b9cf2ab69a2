// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixtures and collaborator stubs shared by unit tests

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::builder::Builder;
use crate::config::FeedConfig;
use crate::downloader::{Downloader, MediaStream};
use crate::error::{BuildError, DownloadError};
use crate::link::LinkInfo;
use crate::model::{Episode, EpisodeStatus, Feed, Format, LinkType, Provider, Quality};

/// Fixed reference point so fixtures are deterministic
pub fn base_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// A `New` episode published at [`base_date`]
pub fn episode(id: &str, title: &str) -> Episode {
    Episode {
        id: id.to_string(),
        title: title.to_string(),
        description: String::new(),
        thumbnail: String::new(),
        duration: 0,
        video_url: format!("https://media.example.com/{id}.mp4"),
        pub_date: base_date(),
        size: 0,
        order: String::new(),
        status: EpisodeStatus::New,
    }
}

/// A `New` episode published `day` days after [`base_date`]
pub fn dated_episode(id: &str, day: i64) -> Episode {
    let mut ep = episode(id, &format!("Episode {id}"));
    ep.description = format!("Description of {id}");
    ep.pub_date = base_date() + Duration::days(day);
    ep
}

/// A remote snapshot as a builder would return it
pub fn snapshot(feed_id: &str, episodes: Vec<Episode>) -> Feed {
    Feed {
        id: feed_id.to_string(),
        item_id: format!("https://example.com/{feed_id}.xml"),
        provider: Provider::Rss,
        link_type: LinkType::Feed,
        format: Format::Video,
        quality: Quality::High,
        page_size: 50,
        title: format!("Feed {feed_id}"),
        description: format!("All about {feed_id}"),
        author: "Author".to_string(),
        item_url: "https://example.com".to_string(),
        cover_art: String::new(),
        language: "en".to_string(),
        explicit: false,
        pub_date: None,
        updated_at: base_date(),
        episodes,
    }
}

/// Builder returning whatever snapshot was last configured
pub struct StubBuilder {
    snapshot: Mutex<Option<Feed>>,
    keys: Mutex<Vec<Option<String>>>,
}

impl StubBuilder {
    pub fn new(snapshot: Feed) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            keys: Mutex::new(Vec::new()),
        }
    }

    /// A builder whose every call fails
    pub fn failing() -> Self {
        Self {
            snapshot: Mutex::new(None),
            keys: Mutex::new(Vec::new()),
        }
    }

    pub fn set_snapshot(&self, snapshot: Feed) {
        *self.snapshot.lock().unwrap() = Some(snapshot);
    }

    /// Keys handed to each build call so far
    pub fn keys(&self) -> Vec<Option<String>> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl Builder for StubBuilder {
    async fn build(
        &self,
        feed: &FeedConfig,
        _link: &LinkInfo,
        key: Option<&str>,
    ) -> Result<Feed, BuildError> {
        self.keys.lock().unwrap().push(key.map(String::from));

        let mut snapshot = self
            .snapshot
            .lock()
            .unwrap()
            .clone()
            .ok_or(BuildError::QuotaExceeded)?;
        snapshot.episodes.truncate(feed.page_size);
        Ok(snapshot)
    }
}

/// What [`ScriptedDownloader`] does for a given episode
#[derive(Debug, Clone)]
pub enum Outcome {
    Content(Vec<u8>),
    RateLimited,
    Fail,
}

/// Downloader with a scripted outcome per episode ID
///
/// Unscripted episodes succeed with `media:<id>` as content.
#[derive(Default)]
pub struct ScriptedDownloader {
    outcomes: HashMap<String, Outcome>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, episode_id: &str, outcome: Outcome) -> Self {
        self.outcomes.insert(episode_id.to_string(), outcome);
        self
    }

    /// Episode IDs passed to `download`, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Downloader for ScriptedDownloader {
    async fn download(
        &self,
        _feed: &FeedConfig,
        episode: &Episode,
    ) -> Result<MediaStream, DownloadError> {
        self.calls.lock().unwrap().push(episode.id.clone());

        let outcome = self
            .outcomes
            .get(&episode.id)
            .cloned()
            .unwrap_or_else(|| Outcome::Content(format!("media:{}", episode.id).into_bytes()));

        match outcome {
            Outcome::Content(content) => Ok(Box::new(std::io::Cursor::new(content))),
            Outcome::RateLimited => Err(DownloadError::RateLimited),
            Outcome::Fail => Err(DownloadError::HttpStatus {
                url: episode.video_url.clone(),
                status: 500,
            }),
        }
    }
}
