//! Index record normalization and tokenization.
//!
//! Index files are often authored by hand or by older generators, so every
//! field except `path` is optional and back-filled from the path.

// Author: kelexine (https://github.com/kelexine)

use crate::github::file_extension;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A record as found in an index file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawIndexRecord {
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub stem: Option<String>,
    #[serde(default)]
    pub segments: Option<Vec<String>>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub last_modified: Option<String>,
}

/// A fully populated, tokenized index record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexFile {
    pub path: String,
    pub name: String,
    pub directory: String,
    pub extension: String,
    pub stem: String,
    pub segments: Vec<String>,
    pub size: u64,
    pub last_modified: Option<String>,
    pub tokens: Vec<String>,
}

/// An index document: either `{"files": [...]}` or a bare array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IndexDocument {
    Wrapped { files: Vec<RawIndexRecord> },
    Bare(Vec<RawIndexRecord>),
}

impl IndexDocument {
    pub fn into_records(self) -> Vec<RawIndexRecord> {
        match self {
            IndexDocument::Wrapped { files } => files,
            IndexDocument::Bare(files) => files,
        }
    }
}

// ASCII alphanumerics plus CJK ideographs, kana and hangul
static TOKEN_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[a-z0-9\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}]+")
        .expect("token run pattern is a valid regex")
});

/// Lower-case `text` and split it on everything that is neither an ASCII
/// alphanumeric nor CJK.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TOKEN_RUN
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Back-fill missing fields from `path` and compute the token set.
pub fn normalize(raw: RawIndexRecord) -> SearchIndexFile {
    let path = raw.path.trim().trim_start_matches('/').to_string();

    let segments = raw
        .segments
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            path.split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        });

    let name = raw
        .name
        .filter(|n| !n.is_empty())
        .or_else(|| segments.last().cloned())
        .unwrap_or_default();

    let directory = raw.directory.unwrap_or_else(|| {
        segments
            .split_last()
            .map(|(_, parents)| parents.join("/"))
            .unwrap_or_default()
    });

    let extension = raw
        .extension
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .or_else(|| file_extension(&name))
        .unwrap_or_default();

    let stem = raw.stem.unwrap_or_else(|| strip_extension(&name, &extension));

    let mut seen = HashSet::new();
    let tokens = [name.as_str(), directory.as_str(), stem.as_str(), extension.as_str()]
        .into_iter()
        .chain(segments.iter().map(String::as_str))
        .flat_map(tokenize)
        .filter(|t| seen.insert(t.clone()))
        .collect();

    SearchIndexFile {
        path,
        name,
        directory,
        extension,
        stem,
        segments,
        size: raw.size.unwrap_or(0),
        last_modified: raw.last_modified,
        tokens,
    }
}

fn strip_extension(name: &str, extension: &str) -> String {
    if extension.is_empty() || name.len() <= extension.len() + 1 {
        return name.to_string();
    }
    let cut = name.len() - extension.len() - 1;
    match (name.get(..cut), name.get(cut..cut + 1)) {
        (Some(stem), Some(".")) if name[cut + 1..].eq_ignore_ascii_case(extension) => stem.to_string(),
        _ => name.to_string(),
    }
}
