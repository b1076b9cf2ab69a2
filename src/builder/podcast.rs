// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::Builder;
use crate::config::FeedConfig;
use crate::error::BuildError;
use crate::http::HttpClient;
use crate::link::LinkInfo;
use crate::model::{Episode, EpisodeStatus, Feed};

/// Builds snapshots from plain podcast RSS feeds
pub struct RssBuilder<C> {
    client: C,
}

impl<C: HttpClient> RssBuilder<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: HttpClient> Builder for RssBuilder<C> {
    async fn build(
        &self,
        feed: &FeedConfig,
        link: &LinkInfo,
        _key: Option<&str>,
    ) -> Result<Feed, BuildError> {
        let url = link.url.as_str();

        let response = self
            .client
            .get_bytes(url)
            .await
            .map_err(|e| BuildError::FetchFailed {
                url: url.to_string(),
                source: e,
            })?;

        if response.status == 429 {
            return Err(BuildError::QuotaExceeded);
        }
        if !response.is_success() {
            return Err(BuildError::HttpStatus {
                url: url.to_string(),
                status: response.status,
            });
        }

        let channel = rss::Channel::read_from(&response.body[..])?;
        Ok(map_channel(&channel, feed, link))
    }
}

/// Map a parsed channel into a snapshot of at most `page_size` episodes
fn map_channel(channel: &rss::Channel, feed: &FeedConfig, link: &LinkInfo) -> Feed {
    let itunes = channel.itunes_ext();

    let episodes: Vec<Episode> = channel
        .items()
        .iter()
        .filter_map(map_item)
        .take(feed.page_size)
        .enumerate()
        .map(|(index, mut episode)| {
            episode.order = (index + 1).to_string();
            episode
        })
        .collect();

    let cover_art = channel
        .image()
        .map(|img| img.url().to_string())
        .or_else(|| itunes.and_then(|ext| ext.image()).map(String::from))
        .unwrap_or_default();

    let author = itunes
        .and_then(|ext| ext.author())
        .or_else(|| channel.managing_editor())
        .unwrap_or_default()
        .to_string();

    let explicit = itunes
        .and_then(|ext| ext.explicit())
        .is_some_and(|value| matches!(value.to_ascii_lowercase().as_str(), "yes" | "true"));

    let pub_date = channel.pub_date().and_then(parse_date);

    // Prefer upstream timestamps so an unchanged feed yields an identical snapshot
    let updated_at = channel
        .last_build_date()
        .and_then(parse_date)
        .or(pub_date)
        .unwrap_or_else(Utc::now);

    Feed {
        id: feed.id.clone(),
        item_id: link.item_id.clone(),
        provider: link.provider,
        link_type: link.link_type,
        format: feed.format,
        quality: feed.quality,
        page_size: feed.page_size,
        title: channel.title().to_string(),
        description: channel.description().to_string(),
        author,
        item_url: channel.link().to_string(),
        cover_art,
        language: channel.language().unwrap_or_default().to_string(),
        explicit,
        pub_date,
        updated_at,
        episodes,
    }
}

fn map_item(item: &rss::Item) -> Option<Episode> {
    let title = item.title().unwrap_or("Untitled Episode").to_string();

    let Some(enclosure) = item.enclosure() else {
        debug!(title = %title, "Skipping item without enclosure");
        return None;
    };

    let id = item
        .guid()
        .map(|g| g.value().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| enclosure.url().to_string());

    let itunes = item.itunes_ext();

    Some(Episode {
        id,
        title,
        description: item.description().unwrap_or_default().to_string(),
        thumbnail: itunes
            .and_then(|ext| ext.image())
            .unwrap_or_default()
            .to_string(),
        duration: itunes
            .and_then(|ext| ext.duration())
            .and_then(parse_itunes_duration)
            .unwrap_or(0),
        video_url: enclosure.url().to_string(),
        pub_date: item
            .pub_date()
            .and_then(parse_date)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        size: enclosure.length().trim().parse().unwrap_or(0),
        order: String::new(),
        status: EpisodeStatus::New,
    })
}

/// Parse RFC 2822 dates, tolerating a few common deviations
fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S %z",
    ];

    DateTime::parse_from_rfc2822(date_str)
        .ok()
        .or_else(|| {
            formats
                .iter()
                .find_map(|format| DateTime::parse_from_str(date_str, format).ok())
        })
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse `itunes:duration` values: `SS`, `MM:SS` or `HH:MM:SS`
fn parse_itunes_duration(raw: &str) -> Option<u64> {
    let mut total: u64 = 0;
    let mut parts = 0;

    for part in raw.trim().split(':') {
        parts += 1;
        if parts > 3 {
            return None;
        }
        let value: u64 = part.trim().parse().ok()?;
        total = total * 60 + value;
    }

    Some(total)
}
