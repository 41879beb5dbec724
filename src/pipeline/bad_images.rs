//! Known-bad image URL set
//!
//! Some storefronts serve the same placeholder photo for every dead
//! listing. Once an image URL has burned us it goes into a flat file; a
//! product whose first image is in the set gets flagged for review instead
//! of re-uploading garbage.

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{info, warn};

pub struct BadImages {
    path: PathBuf,
    set: Mutex<HashSet<String>>,
}

impl BadImages {
    /// Load the persisted set; a missing file is an empty set.
    pub fn load(path: PathBuf) -> Self {
        let set = match std::fs::read_to_string(&path) {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => HashSet::new(),
        };
        info!("Loaded {} known-bad image URLs", set.len());
        Self { path, set: Mutex::new(set) }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.set.lock().map(|set| set.contains(url)).unwrap_or(false)
    }

    /// Remember a bad URL, appending it to the flat file.
    pub fn flag(&self, url: &str) -> Result<()> {
        {
            let mut set = self.set.lock().expect("bad-image set poisoned");
            if !set.insert(url.to_string()) {
                return Ok(());
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        if let Err(e) = writeln!(file, "{url}") {
            warn!("Could not persist bad image URL {url}: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flagged_urls_persist_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad_image_urls.txt");

        let bad = BadImages::load(path.clone());
        assert!(!bad.contains("https://x.com/placeholder.jpg"));
        bad.flag("https://x.com/placeholder.jpg").unwrap();
        assert!(bad.contains("https://x.com/placeholder.jpg"));

        let reloaded = BadImages::load(path);
        assert!(reloaded.contains("https://x.com/placeholder.jpg"));
    }

    #[test]
    fn duplicate_flags_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad_image_urls.txt");
        let bad = BadImages::load(path.clone());
        bad.flag("https://x.com/a.jpg").unwrap();
        bad.flag("https://x.com/a.jpg").unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
