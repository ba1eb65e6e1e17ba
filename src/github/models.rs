//! Remote repository data models.
//!
//! Only the fields needed to cache, route and prefetch are modelled; anything
//! else the API returns is ignored on deserialization.

// Author: kelexine (https://github.com/kelexine)

use serde::{Deserialize, Serialize};

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    File,
    Dir,
    Symlink,
    Submodule,
}

/// One entry of a directory listing (or a single-file response).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Inline body, present when a single file was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl ContentItem {
    pub fn is_dir(&self) -> bool {
        self.kind == ContentKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == ContentKind::File
    }

    /// Lower-case extension of `name`. Dotfiles such as `.gitignore` have none.
    pub fn extension(&self) -> Option<String> {
        file_extension(&self.name)
    }
}

/// Text after the last dot of `name`, lower-cased; `None` for dotfiles and
/// names without a dot.
pub fn file_extension(name: &str) -> Option<String> {
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) if idx + 1 < name.len() => Some(name[idx + 1..].to_lowercase()),
        Some(_) => None,
    }
}

/// Code search response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub incomplete_results: bool,
    #[serde(default)]
    pub items: Vec<SearchHit>,
}

/// One code search match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
    #[serde(default)]
    pub score: f64,
}
