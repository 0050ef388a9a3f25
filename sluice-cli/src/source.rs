//! Directory content source
//!
//! Every regular file under a root directory is a content item. Both its
//! canonical id and its content id are the path relative to the root, with
//! `/` separators.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sluice_core::domain::content::ContentItem;
use sluice_plugins::ContentSource;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub struct DirectoryContentSource {
    root: PathBuf,
}

impl DirectoryContentSource {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            anyhow::bail!("Source '{}' is not a directory", root.display());
        }
        Ok(Self { root })
    }

    /// Lists the files under the root, sorted by canonical id
    ///
    /// Hidden files and directories are skipped.
    pub fn scan(&self) -> Result<Vec<ContentItem>> {
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        let mut items = Vec::new();
        for entry in walker {
            let entry = entry
                .with_context(|| format!("Failed to scan {}", self.root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .with_context(|| format!("Unexpected path {}", entry.path().display()))?;
            let canonical_id = canonical_id(relative);

            let mut item = ContentItem::new(canonical_id.as_str(), canonical_id.as_str());
            if let Ok(metadata) = entry.metadata() {
                item = item.with_metadata("size", serde_json::json!(metadata.len()));
            }
            items.push(item);
        }

        Ok(items)
    }

    fn resolve(&self, content_id: &str) -> Result<PathBuf> {
        let relative = Path::new(content_id);
        let is_contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !is_contained {
            anyhow::bail!("Content id '{}' is outside the source directory", content_id);
        }
        Ok(self.root.join(relative))
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|s| s.starts_with('.'))
}

fn canonical_id(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl ContentSource for DirectoryContentSource {
    async fn read(&self, content_id: &str) -> Result<Vec<u8>> {
        let path = self.resolve(content_id)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}
