//! Prefetch candidate selection.
//!
//! Pure ranking over a directory listing; the service decides when and how
//! the selected items are fetched.

// Author: kelexine (https://github.com/kelexine)

use crate::config::PrefetchConfig;
use crate::github::ContentItem;
use std::cmp::Ordering;

/// Directories worth listing ahead of time.
///
/// Names found in `important_dirs` come first in table order; the rest follow
/// alphabetically. At most `max_dirs` are returned.
pub fn select_directories<'a>(items: &'a [ContentItem], config: &PrefetchConfig) -> Vec<&'a ContentItem> {
    let rank = |item: &ContentItem| {
        let name = item.name.to_lowercase();
        config
            .important_dirs
            .iter()
            .position(|dir| dir.eq_ignore_ascii_case(&name))
    };

    let mut dirs: Vec<&ContentItem> = items.iter().filter(|item| item.is_dir()).collect();
    dirs.sort_by(|a, b| match (rank(a), rank(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    });
    dirs.truncate(config.max_dirs);
    dirs
}

/// Files worth downloading ahead of time.
///
/// Only files with a download URL, at most `max_file_size` bytes and an
/// allowed extension qualify. README-like names come first, then smaller files.
pub fn select_files<'a>(items: &'a [ContentItem], config: &PrefetchConfig) -> Vec<&'a ContentItem> {
    let is_readme = |item: &ContentItem| {
        let name = item.name.to_lowercase();
        config
            .readme_prefixes
            .iter()
            .any(|prefix| name.starts_with(&prefix.to_lowercase()))
    };
    let allowed = |item: &ContentItem| match item.extension() {
        Some(ext) => config
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&ext)),
        None => false,
    };

    let mut files: Vec<&ContentItem> = items
        .iter()
        .filter(|item| item.is_file())
        .filter(|item| item.download_url.is_some())
        .filter(|item| item.size <= config.max_file_size)
        .filter(|item| allowed(item))
        .collect();

    // stable: equal keys keep listing order
    files.sort_by(|a, b| {
        is_readme(b)
            .cmp(&is_readme(a))
            .then_with(|| a.size.cmp(&b.size))
    });
    files.truncate(config.max_files);
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::ContentKind;

    fn item(name: &str, kind: ContentKind, size: u64) -> ContentItem {
        ContentItem {
            name: name.to_string(),
            path: name.to_string(),
            kind,
            size,
            sha: None,
            url: None,
            html_url: None,
            download_url: Some(format!("https://raw.example/{}", name)),
            content: None,
            encoding: None,
        }
    }

    #[test]
    fn test_directory_ranking() {
        let items = vec![
            item("zeta", ContentKind::Dir, 0),
            item("docs", ContentKind::Dir, 0),
            item("alpha", ContentKind::Dir, 0),
            item("src", ContentKind::Dir, 0),
            item("README.md", ContentKind::File, 10),
        ];
        let names: Vec<&str> = select_directories(&items, &PrefetchConfig::default())
            .into_iter()
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(names, vec!["src", "docs", "alpha"]);
    }

    #[test]
    fn test_file_ranking_and_filters() {
        let mut no_url = item("notes.md", ContentKind::File, 1);
        no_url.download_url = None;
        let items = vec![
            item("big.rs", ContentKind::File, 500 * 1024),
            item("main.rs", ContentKind::File, 900),
            item("image.png", ContentKind::File, 10),
            item(".gitignore", ContentKind::File, 5),
            item("lib.rs", ContentKind::File, 300),
            item("README.md", ContentKind::File, 4000),
            no_url,
            item("Cargo.toml", ContentKind::File, 600),
            item("a.json", ContentKind::File, 50),
            item("b.yaml", ContentKind::File, 60),
        ];
        let names: Vec<&str> = select_files(&items, &PrefetchConfig::default())
            .into_iter()
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(names, vec!["README.md", "a.json", "b.yaml", "lib.rs", "Cargo.toml"]);
    }
}
