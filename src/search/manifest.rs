// Search index manifest
// Author: kelexine (https://github.com/kelexine)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Location of one branch's prebuilt index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub branch: String,
    #[serde(default)]
    pub commit: String,
    /// Index file, relative to the index base path unless it contains a `/`.
    pub file: String,
    #[serde(default)]
    pub generated_at: Option<String>,
}

/// Index-of-indexes keyed by sanitized branch name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default, alias = "branches")]
    pub indexes: HashMap<String, ManifestEntry>,
    #[serde(default)]
    pub generated_at: Option<String>,
}

impl Manifest {
    /// Entry for `branch`, looked up by its sanitized name.
    pub fn entry(&self, branch: &str) -> Option<&ManifestEntry> {
        self.indexes.get(&sanitize_branch(branch))
    }
}

/// Map a branch name onto a manifest key: every character outside
/// `[A-Za-z0-9._-]` becomes `_` (so `feature/x` is `feature_x`).
pub fn sanitize_branch(branch: &str) -> String {
    branch
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
