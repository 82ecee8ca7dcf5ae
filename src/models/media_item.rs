use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::identifiers::ItemKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[default]
    Movie,
    TvShow,
    Episode,
}

/// Where a media item can be played from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    #[default]
    LocalOnly,
    RemoteOnly,
    Both,
}

impl Availability {
    pub fn has_local(&self) -> bool {
        matches!(self, Availability::LocalOnly | Availability::Both)
    }

    pub fn has_remote(&self) -> bool {
        matches!(self, Availability::RemoteOnly | Availability::Both)
    }

    pub fn combine(self, other: Availability) -> Availability {
        if (self.has_local() || other.has_local()) && (self.has_remote() || other.has_remote()) {
            Availability::Both
        } else if self.has_local() || other.has_local() {
            Availability::LocalOnly
        } else {
            Availability::RemoteOnly
        }
    }
}

/// A catalog entry as returned by the catalog endpoint.
///
/// Identity is `id`, falling back to `local_path` and then to the normalized
/// title; see [`MediaItem::identity_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MediaItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub media_type: MediaType,
    #[serde(default)]
    pub availability: Availability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_thumbnail_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jellyfin_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub file_validated: bool,
    #[serde(default)]
    pub validation_timestamp: f64,
    /// Set once remote data has been folded into a local record
    #[serde(default)]
    pub enhanced: bool,
}

impl MediaItem {
    pub fn local(id: impl Into<String>, title: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            availability: Availability::LocalOnly,
            local_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn remote(
        id: impl Into<String>,
        title: impl Into<String>,
        jellyfin_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            availability: Availability::RemoteOnly,
            jellyfin_id: Some(jellyfin_id.into()),
            ..Default::default()
        }
    }

    pub fn has_local(&self) -> bool {
        self.availability.has_local()
    }

    pub fn has_remote(&self) -> bool {
        self.availability.has_remote()
    }

    /// Identity key: id, then local path, then normalized title
    pub fn identity_key(&self) -> Option<ItemKey> {
        let id = self.id.trim();
        if !id.is_empty() {
            return Some(ItemKey::from_id(id));
        }

        if let Some(path) = self.local_path.as_deref().map(str::trim)
            && !path.is_empty()
        {
            return Some(ItemKey::from_path(path));
        }

        let normalized = normalize_title(&self.title);
        if normalized.is_empty() {
            None
        } else {
            Some(ItemKey::from_name(&normalized))
        }
    }

    /// Fill gaps in this (local-priority) record from a matching remote record.
    ///
    /// Local id, title and path are never overwritten. Returns true when any
    /// field changed.
    pub fn enhance_from(&mut self, remote: &MediaItem) -> bool {
        let before = self.clone();

        if self.year.is_none() {
            self.year = remote.year;
        }
        if self.duration.is_none() {
            self.duration = remote.duration;
        }
        if self.thumbnail_url.is_none() {
            self.thumbnail_url = remote.thumbnail_url.clone();
        }
        if self.cached_thumbnail_path.is_none() {
            self.cached_thumbnail_path = remote.cached_thumbnail_path.clone();
        }
        if self.jellyfin_id.is_none() {
            self.jellyfin_id = remote.jellyfin_id.clone();
        }
        if self.local_path.is_none() {
            self.local_path = remote.local_path.clone();
        }
        if self.title.trim().is_empty() {
            self.title = remote.title.clone();
        }
        for (key, value) in &remote.metadata {
            self.metadata
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self.availability = self.availability.combine(remote.availability);

        let changed = *self != before;
        if changed {
            self.enhanced = true;
        }
        changed
    }

    /// Adopt only what the remote side alone can provide: its id, thumbnail
    /// and origin flag.
    pub fn adopt_remote_fields(&mut self, remote: &MediaItem) -> bool {
        let before = self.clone();

        if self.jellyfin_id.is_none() {
            self.jellyfin_id = remote.jellyfin_id.clone();
        }
        if self.thumbnail_url.is_none() {
            self.thumbnail_url = remote.thumbnail_url.clone();
        }
        self.availability = self.availability.combine(remote.availability);

        let changed = *self != before;
        if changed {
            self.enhanced = true;
        }
        changed
    }

    /// Structural checks applied before an item is accepted into the catalog
    pub fn structural_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let label = if self.id.is_empty() {
            self.title.as_str()
        } else {
            self.id.as_str()
        };

        if self.identity_key().is_none() {
            problems.push("item has no id, path or title".to_string());
        }
        if self.title.trim().is_empty() {
            problems.push(format!("{}: empty title", label));
        }
        if let Some(year) = self.year
            && !(1800..=2100).contains(&year)
        {
            problems.push(format!("{}: year {} out of range", label, year));
        }

        let has_path = self.local_path.as_deref().is_some_and(|p| !p.is_empty());
        let has_remote_id = self.jellyfin_id.as_deref().is_some_and(|p| !p.is_empty());
        match self.availability {
            Availability::LocalOnly if !has_path => {
                problems.push(format!("{}: local_only item without local_path", label));
            }
            Availability::RemoteOnly if !has_remote_id => {
                problems.push(format!("{}: remote_only item without jellyfin_id", label));
            }
            Availability::Both if !has_path || !has_remote_id => {
                problems.push(format!(
                    "{}: item available in both places needs local_path and jellyfin_id",
                    label
                ));
            }
            _ => {}
        }

        problems
    }

    pub fn is_structurally_valid(&self) -> bool {
        self.structural_problems().is_empty()
    }
}

const LEADING_ARTICLES: &[&str] = &["the", "a", "an"];

const QUALITY_TOKENS: &[&str] = &[
    "1080", "1080p", "720", "720p", "480", "480p", "4k", "uhd", "hdr", "bluray", "bdrip", "dvdrip",
    "webrip", "hdtv", "x264", "x265", "h264", "h265", "hevc",
];

/// Normalize a title for matching: case, leading article, punctuation,
/// years and release-quality tags are ignored.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || c == '_' {
                c
            } else if c == '.' || c == '-' {
                // release names use dots and dashes as separators
                ' '
            } else {
                '\0'
            }
        })
        .filter(|c| *c != '\0')
        .collect();

    let mut words: Vec<&str> = cleaned.split_whitespace().collect();
    if words.len() > 1
        && let Some(first) = words.first()
        && LEADING_ARTICLES.contains(first)
    {
        words.remove(0);
    }

    let kept: Vec<&str> = words
        .iter()
        .copied()
        .filter(|w| !(w.len() == 4 && w.chars().all(|c| c.is_ascii_digit())))
        .filter(|w| !QUALITY_TOKENS.contains(w))
        .collect();

    // titles such as "1917" are nothing but a year
    if kept.is_empty() {
        words.join(" ")
    } else {
        kept.join(" ")
    }
}
