// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod http;

pub use self::http::HttpDownloader;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::config::FeedConfig;
use crate::error::DownloadError;
use crate::model::Episode;

/// A fully materialized episode, readable once
pub type MediaStream = Box<dyn AsyncRead + Send + Unpin>;

/// Fetches episode media from upstream
///
/// Implementations stage the media privately and only hand out a stream once
/// the download is complete, so a file store never receives a partial file.
/// Returning [`DownloadError::RateLimited`] stops the current download phase.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(
        &self,
        feed: &FeedConfig,
        episode: &Episode,
    ) -> Result<MediaStream, DownloadError>;
}

/// A shared reference to a downloader
pub type SharedDownloader = Arc<dyn Downloader>;
