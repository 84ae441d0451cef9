//! Background execution of enrichment jobs

use super::events::{BookCompletedPayload, BookFailedPayload, BookStepPayload, Progress};
use super::provider::provider_tags;
use super::scoring::select_best;
use super::{
    BookTarget, CandidateMatch, DescriptionRefiner, EnrichmentError, EnrichmentOutcome, Job, JobEvent, JobHandle,
    JobRegistry, JobStatus, MetadataProvider, RefineRequest, RefineUpdate,
};
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Where per-book outcomes are written
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Apply one outcome atomically
    async fn apply_outcome(&self, outcome: &EnrichmentOutcome) -> Result<()>;

    async fn record_activity(&self, _action: &str, _detail: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Refined {
    description: Option<String>,
    tags: Vec<String>,
}

struct BookFailure {
    error: EnrichmentError,
    selected: Option<CandidateMatch>,
}

impl BookFailure {
    fn new(error: EnrichmentError, selected: Option<&CandidateMatch>) -> Self {
        Self {
            error,
            selected: selected.cloned(),
        }
    }
}

#[derive(Clone)]
pub struct JobRunner {
    provider: Arc<dyn MetadataProvider>,
    refiner: Arc<dyn DescriptionRefiner>,
    store: Arc<dyn OutcomeStore>,
    registry: JobRegistry,
}

impl JobRunner {
    pub fn new(
        provider: Arc<dyn MetadataProvider>,
        refiner: Arc<dyn DescriptionRefiner>,
        store: Arc<dyn OutcomeStore>,
        registry: JobRegistry,
    ) -> Self {
        Self {
            provider,
            refiner,
            store,
            registry,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn provider(&self) -> &Arc<dyn MetadataProvider> {
        &self.provider
    }

    /// Register a job for `targets` and start processing it in the background
    pub fn start(&self, targets: Vec<BookTarget>) -> Uuid {
        let handle = self.registry.register(Job::new(targets.len()));
        self.spawn(handle.clone(), targets);
        handle.id()
    }

    /// Like [`start`](Self::start) but subscribed before the task runs, so the
    /// stream sees every event including the first `status`.
    pub fn start_streaming(&self, targets: Vec<BookTarget>) -> (Uuid, BoxStream<'static, JobEvent>) {
        let handle = self.registry.register(Job::new(targets.len()));
        let events = handle.subscribe();
        self.spawn(handle.clone(), targets);
        (handle.id(), events)
    }

    fn spawn(&self, handle: Arc<JobHandle>, targets: Vec<BookTarget>) {
        let runner = self.clone();
        tokio::spawn(async move {
            runner.run(&handle, targets).await;
        });
    }

    async fn run(&self, handle: &JobHandle, targets: Vec<BookTarget>) -> Job {
        let job_id = handle.id();
        if !handle.mark_running() {
            tracing::info!("Job {} cancelled before start", job_id);
            let job = handle.finish(JobStatus::Cancelled);
            self.record_finish(&job).await;
            return job;
        }

        tracing::info!(
            "Job {} started: {} books, provider={}, refiner={}",
            job_id,
            targets.len(),
            self.provider.name(),
            self.refiner.name()
        );

        let mut status = JobStatus::Completed;
        for target in &targets {
            if handle.is_cancelled() {
                tracing::info!("Job {} cancelled, stopping before book {}", job_id, target.book_id);
                break;
            }

            handle.begin_book(target.book_id);
            match self.process_book(handle, target).await {
                Ok((selected, tags)) => {
                    let progress = handle.record_book(None);
                    tracing::info!(
                        "Job {}: book {} enriched from {} ({} tags)",
                        job_id,
                        target.book_id,
                        selected.source,
                        tags.len()
                    );
                    handle.emit(JobEvent::BookCompleted(BookCompletedPayload {
                        book_id: target.book_id,
                        title: target.title.clone(),
                        author: target.author.clone(),
                        selected,
                        tags: tags.into_iter().collect(),
                        progress,
                    }));
                }
                Err(failure) => {
                    let detail = failure.error.detail();
                    let progress = handle.record_book(Some(detail.clone()));
                    self.emit_failed(handle, target, detail, failure.selected, progress);

                    if !failure.error.is_recoverable() {
                        tracing::error!("Job {} aborted on book {}: {}", job_id, target.book_id, failure.error);
                        status = JobStatus::Failed;
                        break;
                    }
                    tracing::warn!("Job {}: book {} failed: {}", job_id, target.book_id, failure.error);
                }
            }
        }

        let job = handle.finish(status);
        tracing::info!(
            "Job {} finished with status {} ({}/{} processed, {} failed)",
            job_id,
            job.status,
            job.processed_count,
            job.total_books,
            job.failed_books
        );
        self.record_finish(&job).await;
        job
    }

    fn emit_failed(
        &self,
        handle: &JobHandle,
        target: &BookTarget,
        detail: String,
        selected: Option<CandidateMatch>,
        progress: Progress,
    ) {
        handle.emit(JobEvent::BookFailed(BookFailedPayload {
            book_id: target.book_id,
            title: target.title.clone(),
            author: target.author.clone(),
            detail,
            selected,
            progress,
        }));
    }

    async fn record_finish(&self, job: &Job) {
        let action = match job.status {
            JobStatus::Cancelled => "enrichment_cancelled",
            _ => "enrichment_finished",
        };
        let detail = format!(
            "job {} {}: {} processed, {} succeeded, {} failed",
            job.id, job.status, job.processed_count, job.succeeded_books, job.failed_books
        );
        if let Err(e) = self.store.record_activity(action, &detail).await {
            tracing::warn!("Failed to record activity for job {}: {:#}", job.id, e);
        }
    }

    async fn process_book(
        &self,
        handle: &JobHandle,
        target: &BookTarget,
    ) -> Result<(CandidateMatch, BTreeSet<String>), BookFailure> {
        let candidates = self
            .provider
            .search(target.search_title(), target.search_author())
            .await
            .map_err(|e| BookFailure::new(EnrichmentError::provider(&e), None))?;

        tracing::debug!("Book {}: {} candidates", target.book_id, candidates.len());

        let selected = select_best(&candidates)
            .cloned()
            .ok_or_else(|| BookFailure::new(EnrichmentError::NoResults, None))?;

        let topic_tags = provider_tags(self.provider.as_ref(), &selected).await;

        let request = RefineRequest {
            title: target.title.clone(),
            author: target.author.clone(),
            description: selected.description.clone().unwrap_or_default(),
        };
        let refined = self
            .refine(handle, target.book_id, request)
            .await
            .map_err(|e| BookFailure::new(EnrichmentError::refiner(&e), Some(&selected)))?;

        let mut tags: BTreeSet<String> = topic_tags.into_iter().collect();
        tags.extend(refined.tags);

        let outcome = EnrichmentOutcome {
            book_id: target.book_id,
            applied_tags: tags.clone(),
            description: refined.description.or_else(|| selected.description.clone()),
            raw_description: selected.description.clone(),
            source: selected.source.clone(),
        };
        self.store
            .apply_outcome(&outcome)
            .await
            .map_err(|e| BookFailure::new(EnrichmentError::persist(&e), Some(&selected)))?;

        Ok((selected, tags))
    }

    async fn refine(&self, handle: &JobHandle, book_id: i64, request: RefineRequest) -> Result<Refined> {
        let mut updates = self.refiner.refine(request).await?;
        while let Some(update) = updates.next().await {
            match update? {
                RefineUpdate::Step { action, reasoning } => {
                    tracing::debug!("Book {}: refiner step {}", book_id, action);
                    handle.emit(JobEvent::BookStep(BookStepPayload {
                        book_id,
                        action,
                        reasoning,
                    }));
                }
                RefineUpdate::Finished { description, tags } => {
                    return Ok(Refined { description, tags });
                }
            }
        }
        Ok(Refined::default())
    }
}
