use crate::catalog::Catalog;
use crate::config::LibraryConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One file found under a library root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// Folder name one level below the root
    pub author: Option<String>,
    /// Folder name two levels below the root
    pub title: Option<String>,
    /// `<root>/<author>/<title>`, the key of the book this file belongs to
    pub book_path: Option<PathBuf>,
    pub size: i64,
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub indexed: usize,
    pub scanned_at: String,
}

pub struct LibraryScanner {
    roots: Vec<PathBuf>,
    allowed_extensions: Vec<String>,
    ignore_patterns: Vec<String>,
}

impl LibraryScanner {
    pub fn new(roots: Vec<PathBuf>, allowed_extensions: Vec<String>, ignore_patterns: Vec<String>) -> Self {
        Self {
            roots,
            allowed_extensions,
            ignore_patterns,
        }
    }

    pub fn from_config(config: &LibraryConfig) -> Self {
        Self::new(
            config.library_roots.clone(),
            config.allowed_extensions.clone(),
            config.ignore_patterns.clone(),
        )
    }

    fn is_ignored(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        self.ignore_patterns
            .iter()
            .any(|pattern| !pattern.is_empty() && text.contains(pattern.as_str()))
    }

    fn is_allowed(&self, path: &Path) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_lowercase()))
            .is_some_and(|ext| self.allowed_extensions.contains(&ext))
    }

    /// Walk every root and collect matching files
    pub async fn scan(&self) -> Result<Vec<ScannedFile>> {
        let mut files = Vec::new();

        for root in &self.roots {
            if !tokio::fs::try_exists(root).await.unwrap_or(false) {
                tracing::warn!("Library root does not exist: {}", root.display());
                continue;
            }

            tracing::info!("Scanning library root: {}", root.display());
            let mut pending = vec![root.clone()];

            while let Some(dir) = pending.pop() {
                let mut entries = tokio::fs::read_dir(&dir)
                    .await
                    .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    if self.is_ignored(&path) {
                        continue;
                    }

                    let metadata = match entry.metadata().await {
                        Ok(metadata) => metadata,
                        Err(e) => {
                            tracing::warn!("Failed to stat {}: {}", path.display(), e);
                            continue;
                        }
                    };

                    if metadata.is_dir() {
                        pending.push(path);
                    } else if metadata.is_file() && self.is_allowed(&path) {
                        let modified_at = metadata
                            .modified()
                            .ok()
                            .map(|time| DateTime::<Utc>::from(time).to_rfc3339());
                        files.push(describe_file(root, path, metadata.len() as i64, modified_at));
                    }
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::info!("Scan complete. Found {} files", files.len());
        Ok(files)
    }

    /// Scan and write the result to the catalog
    pub async fn scan_into(&self, catalog: &Catalog) -> Result<ScanSummary> {
        let files = self.scan().await?;
        let indexed = catalog.record_scan(&files).await?;
        let scanned_at = Utc::now().to_rfc3339();
        catalog
            .log_activity("scan", &format!("indexed {} files", indexed))
            .await?;
        Ok(ScanSummary { indexed, scanned_at })
    }
}

fn describe_file(root: &Path, path: PathBuf, size: i64, modified_at: Option<String>) -> ScannedFile {
    let parts: Vec<String> = path
        .strip_prefix(root)
        .map(|relative| {
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();

    let (author, title, book_path) = if parts.len() >= 3 {
        let book_path = root.join(&parts[0]).join(&parts[1]);
        (Some(parts[0].clone()), Some(parts[1].clone()), Some(book_path))
    } else {
        (None, None, None)
    };

    ScannedFile {
        path,
        author,
        title,
        book_path,
        size,
        modified_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn touch(path: &Path) {
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(path, b"data").await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_assigns_author_and_title_from_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("Frank Herbert/Dune/01.mp3")).await;
        touch(&root.join("Frank Herbert/Dune/cd2/02.MP3")).await;
        touch(&root.join("Frank Herbert/cover.jpg")).await;
        touch(&root.join("loose.mp3")).await;
        touch(&root.join("Frank Herbert/Dune/.trash/old.mp3")).await;

        let scanner = LibraryScanner::new(
            vec![root.to_path_buf()],
            vec![".mp3".to_string()],
            vec![".trash".to_string()],
        );
        let files = scanner.scan().await.unwrap();
        assert_eq!(files.len(), 3);

        let nested = files.iter().find(|f| f.path.ends_with("cd2/02.MP3")).unwrap();
        assert_eq!(nested.author.as_deref(), Some("Frank Herbert"));
        assert_eq!(nested.title.as_deref(), Some("Dune"));
        assert_eq!(nested.book_path.as_deref(), Some(root.join("Frank Herbert/Dune").as_path()));
        assert_eq!(nested.size, 4);

        let loose = files.iter().find(|f| f.path.ends_with("loose.mp3")).unwrap();
        assert!(loose.book_path.is_none());
    }

    #[tokio::test]
    async fn test_missing_root_is_skipped() {
        let scanner = LibraryScanner::new(vec![PathBuf::from("/nonexistent/library")], Vec::new(), Vec::new());
        assert!(scanner.scan().await.unwrap().is_empty());
    }
}
