// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use regex::Regex;
use tracing::warn;

use crate::config::Filters;
use crate::model::Episode;

/// Filters with their patterns compiled once per cycle
///
/// An empty pattern is unset and always passes. A pattern that does not
/// compile is logged and skipped, so a typo in the config lets episodes
/// through rather than blocking the feed.
#[derive(Debug)]
pub struct EpisodeFilter {
    title: Option<Regex>,
    not_title: Option<Regex>,
    description: Option<Regex>,
    not_description: Option<Regex>,
    min_duration: u64,
    max_duration: u64,
}

impl EpisodeFilter {
    pub fn new(filters: &Filters) -> Self {
        Self {
            title: compile("title", &filters.title),
            not_title: compile("not_title", &filters.not_title),
            description: compile("description", &filters.description),
            not_description: compile("not_description", &filters.not_description),
            min_duration: filters.min_duration,
            max_duration: filters.max_duration,
        }
    }

    /// Whether an episode passes every set filter
    pub fn matches(&self, episode: &Episode) -> bool {
        let positive = |re: &Option<Regex>, text: &str| re.as_ref().is_none_or(|re| re.is_match(text));
        let negative = |re: &Option<Regex>, text: &str| re.as_ref().is_none_or(|re| !re.is_match(text));

        positive(&self.title, &episode.title)
            && negative(&self.not_title, &episode.title)
            && positive(&self.description, &episode.description)
            && negative(&self.not_description, &episode.description)
            && (self.min_duration == 0 || episode.duration >= self.min_duration)
            && (self.max_duration == 0 || episode.duration <= self.max_duration)
    }
}

fn compile(field: &str, pattern: &str) -> Option<Regex> {
    if pattern.is_empty() {
        return None;
    }

    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(filter = field, pattern, error = %e, "Ignoring invalid filter pattern");
            None
        }
    }
}

/// Check a single episode against a feed's filters
pub fn matches_filters(episode: &Episode, filters: &Filters) -> bool {
    EpisodeFilter::new(filters).matches(episode)
}

/// Pick this cycle's download candidates
///
/// Walks `persisted` in the given order, keeps pending episodes that pass the
/// filters and stops once `budget` candidates are found.
pub fn select_candidates(persisted: Vec<Episode>, filters: &Filters, budget: usize) -> Vec<Episode> {
    let filter = EpisodeFilter::new(filters);

    persisted
        .into_iter()
        .filter(|episode| episode.status.is_pending())
        .filter(|episode| filter.matches(episode))
        .take(budget)
        .collect()
}
