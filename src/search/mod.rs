// Prebuilt search index resolution
// Author: kelexine (https://github.com/kelexine)

pub mod manifest;
pub mod normalize;
mod resolver;

pub use manifest::{sanitize_branch, Manifest, ManifestEntry};
pub use normalize::{normalize, tokenize, IndexDocument, RawIndexRecord, SearchIndexFile};
pub use resolver::{PreparedIndex, SearchIndexResolver};
