// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::FeedConfig;
use crate::model::Episode;

/// Template used when a feed doesn't configure one
const DEFAULT_TEMPLATE: &str = "{{id}}";

/// Maximum length of a rendered file name stem
const MAX_STEM_LENGTH: usize = 150;

const KNOWN_TOKENS: [&str; 4] = ["id", "title", "pub_date", "feed_id"];

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").expect("valid token pattern"));

/// Check that a filename template only uses known tokens
///
/// Returns the first unknown token name on failure.
pub fn validate_template(template: &str) -> Result<(), String> {
    for caps in TOKEN_PATTERN.captures_iter(template) {
        let token = &caps[1];
        if !KNOWN_TOKENS.contains(&token) {
            return Err(token.to_string());
        }
    }
    Ok(())
}

/// Render the file name stem (without extension) for an episode
///
/// Falls back to the episode ID, then to `episode`, if the template renders
/// to nothing usable.
pub fn episode_stem(feed: &FeedConfig, episode: &Episode) -> String {
    let template = match feed.filename_template.trim() {
        "" => DEFAULT_TEMPLATE,
        template => template,
    };

    let rendered = TOKEN_PATTERN.replace_all(template, |caps: &regex::Captures| match &caps[1] {
        "id" => episode.id.clone(),
        "title" => episode.title.clone(),
        "pub_date" => episode.pub_date.format("%Y-%m-%d").to_string(),
        "feed_id" => feed.id.clone(),
        _ => String::new(),
    });

    let stem = sanitize(&rendered);
    if !stem.is_empty() {
        return stem;
    }

    let stem = sanitize(&episode.id);
    if stem.is_empty() {
        "episode".to_string()
    } else {
        stem
    }
}

/// File name of an episode blob, e.g. `abc123.mp3`
pub fn episode_filename(feed: &FeedConfig, episode: &Episode) -> String {
    format!("{}.{}", episode_stem(feed, episode), feed.format.extension())
}

/// Blob path of an episode inside the file store: `<feed_id>/<file name>`
pub fn episode_path(feed: &FeedConfig, episode: &Episode) -> String {
    format!("{}/{}", feed.id, episode_filename(feed, episode))
}

/// Check if a character is allowed in file names (whitelist approach)
fn is_valid_filename_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Replace anything outside the whitelist, collapse separators, trim and limit length
fn sanitize(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|c| if is_valid_filename_char(c) { c } else { '-' })
        .collect();

    let collapsed = collapse_separators(&replaced);
    let trimmed = collapsed.trim_matches(|c: char| matches!(c, '-' | '.' | '_'));

    truncate_at_boundary(trimmed, MAX_STEM_LENGTH)
}

/// Collapse runs of dashes into a single dash
fn collapse_separators(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut last_was_separator = false;

    for c in s.chars() {
        if c == '-' {
            if !last_was_separator {
                result.push('-');
                last_was_separator = true;
            }
        } else {
            result.push(c);
            last_was_separator = false;
        }
    }

    result
}

/// Truncate string at a word boundary
fn truncate_at_boundary(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }

    // Only ASCII survives sanitizing, so byte and char positions agree
    let truncated = &s[..max_len];
    if let Some(pos) = truncated.rfind('-')
        && pos > max_len / 2
    {
        return truncated[..pos].to_string();
    }

    truncated.trim_end_matches('-').to_string()
}
