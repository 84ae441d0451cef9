//! Bulk metadata enrichment
//!
//! A background job walks a snapshot of catalog books and, for each one,
//! searches a metadata provider, picks the best candidate, lets a refiner
//! rewrite the description and infer tags, and writes the outcome back to the
//! catalog. Progress is published as a stream of [`JobEvent`]s.

pub mod error;
pub mod events;
pub mod job;
pub mod provider;
pub mod refiner;
pub mod registry;
pub mod runner;
pub mod scoring;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use error::EnrichmentError;
pub use events::JobEvent;
pub use job::{Job, JobStatus};
pub use provider::{GoogleBooksProvider, MetadataProvider};
pub use refiner::{
    DescriptionRefiner, LlmRefiner, LlmSettings, PassthroughRefiner, RefineRequest, RefineUpdate, build_refiner,
};
pub use registry::{JobHandle, JobRegistry};
pub use runner::{JobRunner, OutcomeStore};

/// Snapshot of a catalog row taken when a job starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookTarget {
    pub book_id: i64,
    /// Title as stored in the catalog
    pub title: String,
    /// Author as stored in the catalog (empty when unknown)
    pub author: String,
    /// Normalized title used for provider queries, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_title: Option<String>,
    /// Normalized author used for provider queries, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_author: Option<String>,
}

impl BookTarget {
    pub fn new(book_id: i64, title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            book_id,
            title: title.into(),
            author: author.into(),
            query_title: None,
            query_author: None,
        }
    }

    /// Title sent to the provider: the normalized form if present
    pub fn search_title(&self) -> &str {
        self.query_title.as_deref().unwrap_or(&self.title)
    }

    /// Author sent to the provider: the normalized form if present
    pub fn search_author(&self) -> &str {
        self.query_author.as_deref().unwrap_or(&self.author)
    }
}

/// One search result from a metadata provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMatch {
    pub result_id: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Overall confidence; `None` ranks below every scored candidate
    pub confidence: Option<f64>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc_score: Option<f64>,
}

/// What gets written back to the catalog for one book
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentOutcome {
    pub book_id: i64,
    pub applied_tags: BTreeSet<String>,
    pub description: Option<String>,
    /// Provider description before any rewriting
    pub raw_description: Option<String>,
    pub source: String,
}
