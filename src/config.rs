// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TOML configuration: global sections plus one `[feeds.<id>]` table per feed.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;
use crate::filename::validate_template;
use crate::model::{Format, Provider, Quality};
use crate::sync::SyncOptions;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_UPDATE_PERIOD: Duration = Duration::from_secs(6 * 60 * 60);
pub const DEFAULT_QUEUE_SIZE: usize = 16;

static FEED_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid feed id pattern"));
static DURATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d+(?:ms|s|m|h|d))+$").expect("valid duration pattern"));
static DURATION_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(ms|s|m|h|d)").expect("valid duration part pattern"));

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub downloader: DownloaderConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Process-wide retention default, overridden per feed
    #[serde(default)]
    pub cleanup: Cleanup,
    #[serde(default)]
    pub log: LogConfig,
    /// API keys per provider, either a single string or a list to rotate through
    #[serde(default)]
    pub tokens: HashMap<String, TokenList>,
    /// Feeds keyed by ID; the ID becomes part of every published URL
    #[serde(default)]
    pub feeds: BTreeMap<String, FeedConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    /// Public base URL of the published files
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Root directory for episodes and feed documents
    #[serde(default)]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloaderConfig {
    /// Private area downloads are staged in until complete
    #[serde(default)]
    pub staging_dir: PathBuf,
    /// Parallel downloads within one feed update
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::new(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Number of feeds updated concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_size: default_queue_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub debug: bool,
}

/// Either `key = "abc"` or `key = ["abc", "def"]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TokenList {
    One(String),
    Many(Vec<String>),
}

impl TokenList {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(key) => vec![key],
            Self::Many(keys) => keys,
        }
    }
}

/// Configuration of a single feed
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Filled from the table key
    #[serde(skip)]
    pub id: String,
    pub url: String,
    /// Bounds both the remote query and the downloads attempted per cycle
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(
        default = "default_update_period",
        deserialize_with = "deserialize_duration"
    )]
    pub update_period: Duration,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub format: Format,
    #[serde(default)]
    pub filters: Filters,
    #[serde(default)]
    pub clean: Cleanup,
    #[serde(default)]
    pub custom: Custom,
    /// Include this feed in the OPML index
    #[serde(default)]
    pub opml: bool,
    /// Blob name template, see [`crate::filename`]
    #[serde(default)]
    pub filename_template: String,
}

impl FeedConfig {
    /// A feed with every optional setting at its default
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            page_size: DEFAULT_PAGE_SIZE,
            update_period: DEFAULT_UPDATE_PERIOD,
            quality: Quality::default(),
            format: Format::default(),
            filters: Filters::default(),
            clean: Cleanup::default(),
            custom: Custom::default(),
            opml: false,
            filename_template: String::new(),
        }
    }
}

/// Title/description regex filters plus duration bounds
///
/// An empty pattern or a zero bound is unset and always passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Filters {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub not_title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub not_description: String,
    /// Seconds
    #[serde(default)]
    pub min_duration: u64,
    /// Seconds
    #[serde(default)]
    pub max_duration: u64,
    /// Days. Accepted but not evaluated by the selector.
    #[serde(default)]
    pub max_age: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Cleanup {
    /// How many downloaded episodes to keep; 0 disables cleanup
    #[serde(default)]
    pub keep_last: Option<usize>,
}

/// Overrides for the published feed document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Custom {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub cover_art: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subcategories: Vec<String>,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default, rename = "lang")]
    pub language: String,
    #[serde(default)]
    pub owner_name: String,
    #[serde(default)]
    pub owner_email: String,
    #[serde(default)]
    pub link: String,
}

fn default_workers() -> usize {
    1
}

fn default_max_concurrent() -> usize {
    1
}

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_update_period() -> Duration {
    DEFAULT_UPDATE_PERIOD
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Parse durations such as `"90s"`, `"30m"`, `"1h30m"` or `"500ms"`
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let trimmed = raw.trim();
    if !DURATION_PATTERN.is_match(trimmed) {
        return Err(ConfigError::InvalidDuration(raw.to_string()));
    }

    let invalid = || ConfigError::InvalidDuration(raw.to_string());

    let mut total = Duration::ZERO;
    for caps in DURATION_PART.captures_iter(trimmed) {
        let value: u64 = caps[1].parse().map_err(|_| invalid())?;
        let part = match &caps[2] {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(60 * 60).map(Duration::from_secs),
            _ => value.checked_mul(24 * 60 * 60).map(Duration::from_secs),
        }
        .ok_or_else(invalid)?;
        total = total.checked_add(part).ok_or_else(invalid)?;
    }

    Ok(total)
}

impl Config {
    /// Load, default and validate the configuration file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration text as if it was read from `path`
    ///
    /// `path` anchors relative defaults such as the database directory.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut config: Config =
            toml::from_str(content).map_err(|e| ConfigError::ParseFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        for (id, feed) in config.feeds.iter_mut() {
            feed.id = id.clone();
        }

        config.apply_defaults(path);
        config.validate()?;

        Ok(config)
    }

    fn apply_defaults(&mut self, config_path: &Path) {
        if self.server.hostname.is_empty() {
            self.server.hostname = match self.server.port {
                Some(port) if port != 80 => format!("http://localhost:{port}"),
                _ => "http://localhost".to_string(),
            };
        }

        if self.database.dir.as_os_str().is_empty() {
            let base = config_path.parent().unwrap_or_else(|| Path::new("."));
            self.database.dir = base.join("db");
        }

        if self.downloader.staging_dir.as_os_str().is_empty() {
            self.downloader.staging_dir = std::env::temp_dir().join("podsync");
        }
    }

    /// Collect every problem instead of stopping at the first one
    fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.storage.data_dir.as_os_str().is_empty() {
            problems.push("storage.data_dir is required".to_string());
        }

        if self.scheduler.workers == 0 {
            problems.push("scheduler.workers must be at least 1".to_string());
        }

        if self.downloader.max_concurrent == 0 {
            problems.push("downloader.max_concurrent must be at least 1".to_string());
        }

        if self.scheduler.queue_size == 0 {
            problems.push("scheduler.queue_size must be at least 1".to_string());
        }

        if self.feeds.is_empty() {
            problems.push("at least one feed must be specified".to_string());
        }

        for name in self.tokens.keys() {
            if name.parse::<Provider>().is_err() {
                problems.push(format!("unknown token provider {name:?}"));
            }
        }

        for (id, feed) in &self.feeds {
            if !FEED_ID_PATTERN.is_match(id) {
                problems.push(format!(
                    "feed ID {id:?} may only contain letters, digits, '-' and '_'"
                ));
            }

            if feed.url.trim().is_empty() {
                problems.push(format!("URL is required for {id:?}"));
            }

            if feed.page_size == 0 {
                problems.push(format!("page_size of {id:?} must be at least 1"));
            }

            if feed.update_period.is_zero() {
                problems.push(format!("update_period of {id:?} must be positive"));
            }

            if let Err(token) = validate_template(&feed.filename_template) {
                problems.push(format!(
                    "unknown filename template token {token:?} in {id:?}"
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Log settings that are accepted but have no effect
    pub fn warn_ignored_settings(&self) {
        for (id, feed) in &self.feeds {
            if feed.filters.max_age > 0 {
                tracing::warn!(
                    feed_id = %id,
                    max_age = feed.filters.max_age,
                    "filters.max_age is not evaluated when selecting downloads"
                );
            }
        }
    }

    /// Token lists keyed by the provider they unlock
    pub fn provider_tokens(&self) -> Vec<(Provider, Vec<String>)> {
        self.tokens
            .iter()
            .filter_map(|(name, list)| {
                let provider = name.parse::<Provider>().ok()?;
                Some((provider, list.clone().into_vec()))
            })
            .collect()
    }

    /// Process-wide settings for the update cycle
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            hostname: self.server.hostname.clone(),
            default_keep_last: self.cleanup.keep_last.unwrap_or(0),
            max_concurrent_downloads: self.downloader.max_concurrent,
        }
    }
}
