// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use url::Url;

use crate::error::LinkError;
use crate::model::{LinkType, Provider};

/// What a feed URL points at upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub provider: Provider,
    pub link_type: LinkType,
    /// Channel, playlist, user or group identifier
    pub item_id: String,
    pub url: Url,
}

/// Parse a feed URL into provider, link type and upstream item ID
///
/// Links without a scheme are treated as `https://`. Hosts that are not a
/// known video platform are plain podcast RSS sources.
pub fn parse_link(link: &str) -> Result<LinkInfo, LinkError> {
    let normalized = if link.starts_with("http://") || link.starts_with("https://") {
        link.to_string()
    } else {
        format!("https://{link}")
    };

    let url = Url::parse(&normalized).map_err(|e| LinkError::ParseFailed {
        link: link.to_string(),
        source: e,
    })?;

    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let unsupported = |reason: &str| LinkError::Unsupported {
        link: link.to_string(),
        reason: reason.to_string(),
    };

    let (provider, link_type, item_id) = if host_matches(&host, "youtube.com") {
        let (kind, id) = parse_youtube(&url).map_err(unsupported)?;
        (Provider::Youtube, kind, id)
    } else if host_matches(&host, "vimeo.com") {
        let (kind, id) = parse_vimeo(&url).map_err(unsupported)?;
        (Provider::Vimeo, kind, id)
    } else if host_matches(&host, "soundcloud.com") {
        let (kind, id) = parse_soundcloud(&url).map_err(unsupported)?;
        (Provider::Soundcloud, kind, id)
    } else if host.is_empty() {
        return Err(unsupported("missing host"));
    } else {
        (Provider::Rss, LinkType::Feed, url.to_string())
    };

    Ok(LinkInfo {
        provider,
        link_type,
        item_id,
        url,
    })
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn path_parts(url: &Url) -> Vec<&str> {
    url.path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

fn parse_youtube(url: &Url) -> Result<(LinkType, String), &'static str> {
    let parts = path_parts(url);
    let Some(first) = parts.first() else {
        return Err("youtube URL path is empty");
    };

    match *first {
        "playlist" | "watch" => url
            .query_pairs()
            .find(|(key, value)| *key == "list" && !value.is_empty())
            .map(|(_, value)| (LinkType::Playlist, value.into_owned()))
            .ok_or("playlist URL is missing 'list' query parameter"),
        "channel" => parts
            .get(1)
            .map(|id| (LinkType::Channel, id.to_string()))
            .ok_or("youtube channel link is missing the channel ID"),
        "user" => parts
            .get(1)
            .map(|name| (LinkType::User, name.to_string()))
            .ok_or("youtube user link is missing the user name"),
        handle if handle.starts_with('@') => match parts.get(1).map(|s| s.to_ascii_lowercase()) {
            None => Ok((LinkType::Channel, handle.to_string())),
            Some(suffix) if suffix == "videos" => Ok((LinkType::Channel, handle.to_string())),
            Some(suffix) if suffix == "playlists" => Ok((LinkType::Playlist, handle.to_string())),
            Some(_) => Err("unsupported youtube handle link suffix"),
        },
        _ => Err("unsupported youtube link format"),
    }
}

fn parse_vimeo(url: &Url) -> Result<(LinkType, String), &'static str> {
    let parts = path_parts(url);
    let Some(first) = parts.first() else {
        return Err("vimeo link path is empty");
    };

    match first.to_ascii_lowercase().as_str() {
        "groups" => parts
            .get(1)
            .map(|id| (LinkType::Group, id.to_string()))
            .ok_or("vimeo group link is missing the group ID"),
        "channels" => parts
            .get(1)
            .map(|id| (LinkType::Channel, id.to_string()))
            .ok_or("vimeo channel link is missing the channel ID"),
        _ => Ok((LinkType::User, first.to_string())),
    }
}

fn parse_soundcloud(url: &Url) -> Result<(LinkType, String), &'static str> {
    match path_parts(url).as_slice() {
        [_user, "sets", playlist, ..] => Ok((LinkType::Playlist, playlist.to_string())),
        _ => Err("only soundcloud playlists (/<user>/sets/<name>) are supported"),
    }
}
