// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod podcast;

pub use self::podcast::RssBuilder;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::FeedConfig;
use crate::error::BuildError;
use crate::link::LinkInfo;
use crate::model::Feed;

/// Queries an upstream platform and maps it into a feed snapshot
///
/// The snapshot carries at most `feed.page_size` episodes, all with status
/// `New`. Implementations must not touch storage.
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(
        &self,
        feed: &FeedConfig,
        link: &LinkInfo,
        key: Option<&str>,
    ) -> Result<Feed, BuildError>;
}

/// A shared reference to a builder
pub type SharedBuilder = Arc<dyn Builder>;
