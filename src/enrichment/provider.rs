//! Metadata providers: where enrichment candidates come from

use super::CandidateMatch;
use super::scoring::confidence_score;
use anyhow::{Context, Result};
use async_trait::async_trait;
use book_search_rs::{BookApi, BookQuery, GoogleBooksApi, category_topics};
use std::collections::HashSet;

/// Source of candidate matches for a (title, author) pair
///
/// Implement this trait to plug a new metadata service into the
/// enrichment pipeline.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Unique provider name, recorded as the outcome source
    fn name(&self) -> &str;

    /// Search for candidates; results carry a confidence score
    async fn search(&self, title: &str, author: &str) -> Result<Vec<CandidateMatch>>;

    /// Extra tags the provider knows for a result id
    async fn tags(&self, _result_id: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Provider backed by any [`BookApi`] (Google Books by default)
pub struct GoogleBooksProvider {
    api: Box<dyn BookApi>,
}

impl GoogleBooksProvider {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let api = GoogleBooksApi::new(api_key).context("Failed to create Google Books API client")?;
        Ok(Self { api: Box::new(api) })
    }

    pub fn with_api(api: Box<dyn BookApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl MetadataProvider for GoogleBooksProvider {
    fn name(&self) -> &str {
        self.api.source().as_str()
    }

    async fn search(&self, title: &str, author: &str) -> Result<Vec<CandidateMatch>> {
        let query = BookQuery::new().with_title(title).with_author(author);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let volumes = self
            .api
            .search(&query)
            .await
            .context("Google Books search failed")?;

        tracing::debug!("Google Books returned {} volumes", volumes.len());

        let candidates = volumes
            .into_iter()
            .map(|volume| {
                let author_line = volume.author_line();
                let score = confidence_score(
                    title,
                    author,
                    volume.title.as_deref(),
                    author_line.as_deref(),
                    volume.description.as_deref(),
                );
                CandidateMatch {
                    result_id: volume.id,
                    title: volume.title,
                    author: author_line,
                    description: volume.description,
                    categories: volume.categories,
                    confidence: Some(score.overall),
                    source: self.name().to_string(),
                    identity_score: Some(score.identity),
                    desc_score: Some(score.description),
                }
            })
            .collect();

        Ok(candidates)
    }

    async fn tags(&self, result_id: &str) -> Result<Vec<String>> {
        self.api
            .get_topics(result_id)
            .await
            .with_context(|| format!("Failed to fetch volume {}", result_id))
    }
}

/// Tags contributed by the provider for the selected candidate.
///
/// Category topics come first, then any extra provider tags; duplicates are
/// dropped case-insensitively. A failing tag lookup is logged and skipped.
pub async fn provider_tags(provider: &dyn MetadataProvider, candidate: &CandidateMatch) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tags = Vec::new();
    let mut push = |tag: String| {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && seen.insert(tag.to_lowercase()) {
            tags.push(tag);
        }
    };

    for topic in category_topics(&candidate.categories) {
        push(topic);
    }

    if !candidate.result_id.is_empty() {
        match provider.tags(&candidate.result_id).await {
            Ok(extra) => extra.into_iter().for_each(&mut push),
            Err(e) => tracing::warn!(
                "Provider {} tag lookup failed for {}: {:#}",
                provider.name(),
                candidate.result_id,
                e
            ),
        }
    }

    tags
}
