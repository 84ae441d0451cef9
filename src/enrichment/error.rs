use thiserror::Error;

/// Failures surfaced by the enrichment pipeline.
///
/// `Provider`, `Refiner` and `NoResults` are recovered per book; `Persist`
/// aborts the whole job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentError {
    #[error("no results")]
    NoResults,

    #[error("metadata search failed: {0}")]
    Provider(String),

    #[error("description refinement failed: {0}")]
    Refiner(String),

    #[error("catalog write failed: {0}")]
    Persist(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl EnrichmentError {
    pub fn provider(err: &anyhow::Error) -> Self {
        Self::Provider(format!("{:#}", err))
    }

    pub fn refiner(err: &anyhow::Error) -> Self {
        Self::Refiner(format!("{:#}", err))
    }

    /// A store error; a missing book stays a per-book `NotFound`
    pub fn persist(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<EnrichmentError>() {
            Some(Self::NotFound(what)) => Self::NotFound(what.clone()),
            _ => Self::Persist(format!("{:#}", err)),
        }
    }

    /// Human-readable message for events and API responses
    pub fn detail(&self) -> String {
        self.to_string()
    }

    /// Whether the job may continue with the next book
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Persist(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_detail_includes_context_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("connection refused"))
            .context("volume search")
            .unwrap_err();
        let detail = EnrichmentError::provider(&err).detail();
        assert_eq!(detail, "metadata search failed: volume search: connection refused");
    }

    #[test]
    fn test_only_persist_is_fatal() {
        assert!(EnrichmentError::NoResults.is_recoverable());
        assert!(EnrichmentError::Refiner("x".into()).is_recoverable());
        assert!(!EnrichmentError::Persist("x".into()).is_recoverable());
        assert_eq!(EnrichmentError::NoResults.detail(), "no results");
    }

    #[test]
    fn test_missing_book_is_not_a_persist_failure() {
        let err = anyhow::Error::new(EnrichmentError::NotFound("book 7".into()));
        let mapped = EnrichmentError::persist(&err);
        assert_eq!(mapped, EnrichmentError::NotFound("book 7".into()));
        assert!(mapped.is_recoverable());

        let locked = EnrichmentError::persist(&anyhow::anyhow!("database is locked"));
        assert!(!locked.is_recoverable());
    }
}
