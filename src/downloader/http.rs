// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tracing::{debug, warn};

use super::{Downloader, MediaStream};
use crate::config::FeedConfig;
use crate::error::DownloadError;
use crate::http::HttpClient;
use crate::model::Episode;

const HTTP_TOO_MANY_REQUESTS: u16 = 429;

/// Downloads episodes whose media URL can be fetched directly
///
/// The body is streamed into a staging file first; the returned stream reads
/// that file and removes it once dropped. An abandoned download removes its
/// staging file too.
pub struct HttpDownloader<C> {
    client: C,
    staging_dir: PathBuf,
}

impl<C: HttpClient> HttpDownloader<C> {
    pub fn new(client: C, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            staging_dir: staging_dir.into(),
        }
    }

    fn staging_path(&self, feed: &FeedConfig, episode: &Episode) -> PathBuf {
        let key = format!("{}/{}", feed.id, episode.id);
        let digest = Sha256::digest(key.as_bytes());
        self.staging_dir.join(format!("{digest:x}.partial"))
    }

    /// Stream the response body into the staging file
    async fn stage(&self, url: &str, path: &Path) -> Result<u64, DownloadError> {
        let response = self
            .client
            .get_stream(url)
            .await
            .map_err(|e| DownloadError::HttpFailed {
                url: url.to_string(),
                source: e,
            })?;

        if response.status == HTTP_TOO_MANY_REQUESTS {
            return Err(DownloadError::RateLimited);
        }
        if response.status >= 400 {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: response.status,
            });
        }

        let staging_failed = |e: io::Error| DownloadError::StagingFailed {
            path: path.to_path_buf(),
            source: e,
        };

        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(staging_failed)?;
        let mut file = File::create(path).await.map_err(staging_failed)?;

        let mut bytes_downloaded: u64 = 0;
        let mut stream = response.body;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| DownloadError::StreamFailed {
                url: url.to_string(),
                source: e,
            })?;

            file.write_all(&chunk).await.map_err(staging_failed)?;
            bytes_downloaded += chunk.len() as u64;
        }

        file.flush().await.map_err(staging_failed)?;

        Ok(bytes_downloaded)
    }
}

#[async_trait]
impl<C: HttpClient> Downloader for HttpDownloader<C> {
    async fn download(
        &self,
        feed: &FeedConfig,
        episode: &Episode,
    ) -> Result<MediaStream, DownloadError> {
        let url = episode.video_url.as_str();

        // Removes the file on every exit, including a dropped future
        let staging = StagingFile(self.staging_path(feed, episode));

        let bytes = self.stage(url, &staging.0).await?;
        debug!(feed_id = %feed.id, episode_id = %episode.id, bytes, "Staged episode");

        let file = File::open(&staging.0)
            .await
            .map_err(|e| DownloadError::StagingFailed {
                path: staging.0.clone(),
                source: e,
            })?;

        Ok(Box::new(StagedMedia {
            file,
            _staging: staging,
        }))
    }
}

/// Path of a staging file, removed when dropped
struct StagingFile(PathBuf);

impl Drop for StagingFile {
    fn drop(&mut self) {
        remove_staging_file(&self.0);
    }
}

/// Read side of a completed staging file
struct StagedMedia {
    file: File,
    // Dropped after `file`, so the handle is closed before removal
    _staging: StagingFile,
}

impl AsyncRead for StagedMedia {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

fn remove_staging_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove staging file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{BufferedResponse, ByteStream, HttpResponse};
    use crate::testing::episode;
    use bytes::Bytes;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;

    struct MockHttpClient {
        response_data: Vec<u8>,
        status: u16,
        /// Never finish the body after the first chunk
        stall: bool,
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get_bytes(&self, _url: &str) -> Result<BufferedResponse, reqwest::Error> {
            Ok(BufferedResponse {
                status: self.status,
                body: Bytes::from(self.response_data.clone()),
            })
        }

        async fn get_stream(&self, _url: &str) -> Result<HttpResponse, reqwest::Error> {
            let data = self.response_data.clone();
            let len = data.len() as u64;

            let first = futures::stream::once(async move { Ok(Bytes::from(data)) });
            let stream: ByteStream = if self.stall {
                Box::pin(first.chain(futures::stream::pending()))
            } else {
                Box::pin(first)
            };

            Ok(HttpResponse {
                status: self.status,
                content_length: Some(len),
                body: stream,
            })
        }
    }

    fn downloader(status: u16, data: &[u8], staging: &Path) -> HttpDownloader<MockHttpClient> {
        HttpDownloader::new(
            MockHttpClient {
                response_data: data.to_vec(),
                status,
                stall: false,
            },
            staging,
        )
    }

    fn feed() -> FeedConfig {
        FeedConfig::new("podcast", "https://example.com/feed.xml")
    }

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn download_stages_and_streams_content() {
        let dir = tempdir().unwrap();
        let downloader = downloader(200, b"test audio content", dir.path());

        let mut stream = downloader
            .download(&feed(), &episode("ep1", "Episode 1"))
            .await
            .unwrap();

        assert_eq!(staged_files(dir.path()), 1);

        let mut content = Vec::new();
        stream.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"test audio content");

        drop(stream);
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn download_maps_429_to_rate_limited() {
        let dir = tempdir().unwrap();
        let downloader = downloader(429, b"slow down", dir.path());

        let err = downloader
            .download(&feed(), &episode("ep1", "Episode 1"))
            .await
            .err()
            .unwrap();

        assert!(err.is_rate_limited());
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn download_fails_on_http_error() {
        let dir = tempdir().unwrap();
        let downloader = downloader(404, b"Not Found", dir.path());

        let result = downloader
            .download(&feed(), &episode("ep1", "Episode 1"))
            .await;

        match result {
            Err(DownloadError::HttpStatus { status, .. }) => assert_eq!(status, 404),
            _ => panic!("Expected HttpStatus error"),
        }
    }

    #[tokio::test]
    async fn abandoned_download_removes_staging_file() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging");
        let downloader = HttpDownloader::new(
            MockHttpClient {
                response_data: b"first chunk".to_vec(),
                status: 200,
                stall: true,
            },
            &staging,
        );

        let feed = feed();
        let episode = episode("ep1", "Episode 1");
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            downloader.download(&feed, &episode),
        )
        .await;

        assert!(result.is_err(), "download should still be waiting for data");
        assert!(staging.exists(), "staging directory was created");
        assert_eq!(staged_files(&staging), 0);
    }
}
