// GitHub API access module
// Author: kelexine (https://github.com/kelexine)

mod client;
mod models;

pub use client::{classify_status, decode_file_payload, normalize_listing, ApiResponse, GitHubClient};
pub use models::{file_extension, ContentItem, ContentKind, SearchHit, SearchResults};
