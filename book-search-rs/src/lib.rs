pub mod error;
pub mod google_books;
pub mod models;

use async_trait::async_trait;
pub use error::{BookSearchError, Result};
pub use google_books::GoogleBooksApi;
pub use models::*;
use std::collections::HashSet;

/// Unified API trait for book metadata services
#[async_trait]
pub trait BookApi: Send + Sync {
    /// Get the search source
    fn source(&self) -> SearchSource;

    /// Search for volumes matching a title/author query
    async fn search(&self, query: &BookQuery) -> Result<Vec<Volume>>;

    /// Get a single volume by id
    async fn get_volume(&self, volume_id: &str) -> Result<Volume>;

    /// Topic tags derived from a volume's categories
    async fn get_topics(&self, volume_id: &str) -> Result<Vec<String>> {
        let volume = self.get_volume(volume_id).await?;
        Ok(category_topics(&volume.categories))
    }
}

#[async_trait]
impl BookApi for GoogleBooksApi {
    fn source(&self) -> SearchSource {
        SearchSource::GoogleBooks
    }

    async fn search(&self, query: &BookQuery) -> Result<Vec<Volume>> {
        self.search(query).await
    }

    async fn get_volume(&self, volume_id: &str) -> Result<Volume> {
        self.get_volume(volume_id).await
    }
}

/// Turn category paths such as `Fiction / Fantasy > Epic` into
/// `topic:` tags, one per path segment.
///
/// Segments are trimmed and whitespace-collapsed; duplicates are dropped
/// case-insensitively, keeping the first spelling seen.
pub fn category_topics<S: AsRef<str>>(categories: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut topics = Vec::new();

    for category in categories {
        for part in category.as_ref().split(['/', '>']) {
            let normalized = part.split_whitespace().collect::<Vec<_>>().join(" ");
            if normalized.is_empty() {
                continue;
            }
            if seen.insert(normalized.to_lowercase()) {
                topics.push(format!("topic:{}", normalized));
            }
        }
    }

    topics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_topics_split_and_dedupe() {
        let categories = [
            "Fiction / Fantasy / Epic",
            "fiction > Historical",
            "  ",
        ];
        assert_eq!(
            category_topics(&categories),
            vec![
                "topic:Fiction",
                "topic:Fantasy",
                "topic:Epic",
                "topic:Historical",
            ]
        );
    }

    #[test]
    fn test_category_topics_collapses_whitespace() {
        assert_eq!(
            category_topics(&["Science   Fiction"]),
            vec!["topic:Science Fiction"]
        );
    }
}
