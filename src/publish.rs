// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use html_escape::encode_double_quoted_attribute as attr;
use rss::extension::itunes::{
    ITunesCategory, ITunesChannelExtension, ITunesItemExtension, ITunesOwner,
};
use rss::{Channel, Enclosure, Guid, Image, Item};
use tracing::{debug, info};

use crate::config::FeedConfig;
use crate::error::PublishError;
use crate::filename::episode_filename;
use crate::filestore::FileStore;
use crate::model::{EpisodeStatus, Feed};
use crate::storage::Storage;

/// Name of the aggregate OPML document
pub const OPML_NAME: &str = "podsync.opml";

const GENERATOR: &str = concat!("podsync ", env!("CARGO_PKG_VERSION"));

/// Name of a feed's published document
pub fn feed_document_name(feed_id: &str) -> String {
    format!("{feed_id}.xml")
}

/// Render the podcast document for a stored feed
///
/// Only `Downloaded` episodes are listed, newest first, numbered from 1.
/// The output depends on nothing but the arguments.
pub fn render_feed(feed: &Feed, config: &FeedConfig, hostname: &str) -> Result<String, PublishError> {
    let hostname = hostname.trim_end_matches('/');
    let custom = &config.custom;

    let mut episodes: Vec<_> = feed
        .episodes
        .iter()
        .filter(|ep| ep.status == EpisodeStatus::Downloaded)
        .collect();
    episodes.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));

    let items: Vec<Item> = episodes
        .iter()
        .enumerate()
        .map(|(index, ep)| {
            let mut guid = Guid::default();
            guid.set_value(ep.id.clone());
            guid.set_permalink(false);

            let mut enclosure = Enclosure::default();
            enclosure.set_url(format!(
                "{hostname}/{}/{}",
                config.id,
                episode_filename(config, ep)
            ));
            enclosure.set_length(ep.size.to_string());
            enclosure.set_mime_type(config.format.mime_type());

            let mut itunes = ITunesItemExtension::default();
            itunes.set_duration(format_duration(ep.duration));
            itunes.set_order((index + 1).to_string());
            if !ep.thumbnail.is_empty() {
                itunes.set_image(ep.thumbnail.clone());
            }

            let mut item = Item::default();
            item.set_title(ep.title.clone());
            item.set_description(ep.description.clone());
            item.set_guid(guid);
            item.set_pub_date(ep.pub_date.to_rfc2822());
            item.set_enclosure(enclosure);
            item.set_itunes_ext(itunes);
            item
        })
        .collect();

    let title = pick(&custom.title, &feed.title);
    let description = pick(&custom.description, &feed.description);
    let author = pick(&custom.author, &feed.author);
    let cover_art = pick(&custom.cover_art, &feed.cover_art);
    let link = pick(&custom.link, &feed.item_url);
    let language = pick(&custom.language, &feed.language);
    let explicit = custom.explicit || feed.explicit;

    let mut itunes = ITunesChannelExtension::default();
    itunes.set_summary(description.to_string());
    itunes.set_explicit(if explicit { "true" } else { "false" }.to_string());
    if !author.is_empty() {
        itunes.set_author(author.to_string());
    }
    if !cover_art.is_empty() {
        itunes.set_image(cover_art.to_string());
    }
    if !custom.category.is_empty() {
        itunes.set_categories(categories(&custom.category, &custom.subcategories));
    }
    if !custom.owner_name.is_empty() || !custom.owner_email.is_empty() {
        let mut owner = ITunesOwner::default();
        if !custom.owner_name.is_empty() {
            owner.set_name(custom.owner_name.clone());
        }
        if !custom.owner_email.is_empty() {
            owner.set_email(custom.owner_email.clone());
        }
        itunes.set_owner(owner);
    }

    let mut channel = Channel::default();
    channel.set_title(title);
    channel.set_link(link);
    channel.set_description(description);
    channel.set_generator(GENERATOR.to_string());
    channel.set_last_build_date(feed.updated_at.to_rfc2822());
    if let Some(pub_date) = feed.pub_date {
        channel.set_pub_date(pub_date.to_rfc2822());
    }
    if !language.is_empty() {
        channel.set_language(language.to_string());
    }
    if !cover_art.is_empty() {
        let mut image = Image::default();
        image.set_url(cover_art);
        image.set_title(title);
        image.set_link(link);
        channel.set_image(image);
    }
    channel.set_itunes_ext(itunes);
    channel.set_items(items);

    let bytes = channel
        .write_to(Vec::new())
        .map_err(|e| PublishError::RenderFailed {
            feed_id: config.id.clone(),
            source: e,
        })?;

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Rebuild and upload a feed's document from stored state
///
/// Returns the name the document was stored under.
pub async fn publish_feed(
    config: &FeedConfig,
    hostname: &str,
    storage: &dyn Storage,
    files: &dyn FileStore,
) -> Result<String, PublishError> {
    let feed = storage.get_feed(&config.id).await?;
    let document = render_feed(&feed, config, hostname)?;

    let name = feed_document_name(&config.id);
    upload(files, &name, document.as_bytes()).await?;

    info!(feed_id = %config.id, file = %name, "Published feed");
    Ok(name)
}

/// Render the OPML index for the given stored feeds
pub fn render_opml(feeds: &[Feed], hostname: &str) -> String {
    let hostname = hostname.trim_end_matches('/');

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<opml version=\"1.0\">\n");
    out.push_str("  <head>\n    <title>Podsync feeds</title>\n  </head>\n");
    out.push_str("  <body>\n");

    for feed in feeds {
        let url = format!("{hostname}/{}", feed_document_name(&feed.id));
        out.push_str(&format!(
            "    <outline text=\"{}\" type=\"rss\" xmlUrl=\"{}\" title=\"{}\" />\n",
            attr(&feed.description),
            attr(&url),
            attr(&feed.title),
        ));
    }

    out.push_str("  </body>\n</opml>\n");
    out
}

/// Rebuild and upload the OPML index across all feeds that opted in
///
/// Feeds that were never stored yet are left out.
pub async fn publish_opml<'a>(
    configs: impl IntoIterator<Item = &'a FeedConfig>,
    hostname: &str,
    storage: &dyn Storage,
    files: &dyn FileStore,
) -> Result<(), PublishError> {
    let mut feeds = Vec::new();

    for config in configs.into_iter().filter(|c| c.opml) {
        match storage.get_feed(&config.id).await {
            Ok(mut feed) => {
                // The index lists the published title, customised or not
                feed.title = pick(&config.custom.title, &feed.title).to_string();
                feed.description = pick(&config.custom.description, &feed.description).to_string();
                feeds.push(feed);
            }
            Err(e) if e.is_not_found() => {
                debug!(feed_id = %config.id, "Feed not stored yet, leaving it out of OPML");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let document = render_opml(&feeds, hostname);
    upload(files, OPML_NAME, document.as_bytes()).await?;

    info!(feeds = feeds.len(), "Published OPML");
    Ok(())
}

async fn upload(files: &dyn FileStore, name: &str, mut content: &[u8]) -> Result<(), PublishError> {
    files
        .create(name, &mut content)
        .await
        .map(|_| ())
        .map_err(|e| PublishError::UploadFailed {
            name: name.to_string(),
            source: e,
        })
}

fn pick<'a>(custom: &'a str, fallback: &'a str) -> &'a str {
    if custom.is_empty() { fallback } else { custom }
}

fn categories(category: &str, subcategories: &[String]) -> Vec<ITunesCategory> {
    let mut parent = ITunesCategory::default();
    parent.set_text(category);

    if subcategories.is_empty() {
        return vec![parent];
    }

    subcategories
        .iter()
        .map(|sub| {
            let mut child = ITunesCategory::default();
            child.set_text(sub.as_str());

            let mut category = parent.clone();
            category.set_subcategory(Box::new(child));
            category
        })
        .collect()
}

/// Seconds as `HH:MM:SS`
fn format_duration(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
