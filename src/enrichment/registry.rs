//! In-memory job table
//!
//! Each job lives in its own [`JobHandle`] with a per-job lock and one
//! unbounded channel per subscriber, so a slow reader never loses events.
//! The table lock only guards membership.

use super::events::{Progress, StatusPayload};
use super::{EnrichmentError, Job, JobEvent, JobStatus};
use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const DEFAULT_MAX_FINISHED_JOBS: usize = 100;

pub struct JobHandle {
    job: Mutex<Job>,
    /// `None` once `done` has been emitted
    subscribers: Mutex<Option<Vec<mpsc::UnboundedSender<JobEvent>>>>,
}

impl JobHandle {
    fn new(job: Job) -> Self {
        Self {
            job: Mutex::new(job),
            subscribers: Mutex::new(Some(Vec::new())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.job.lock().id
    }

    pub fn snapshot(&self) -> Job {
        self.job.lock().clone()
    }

    pub fn status(&self) -> JobStatus {
        self.job.lock().status
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == JobStatus::Cancelled
    }

    /// Publish an event to current subscribers. Events after `done` are dropped.
    pub fn emit(&self, event: JobEvent) {
        if let Some(subscribers) = self.subscribers.lock().as_mut() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    fn emit_status(&self, job: Job) {
        self.emit(JobEvent::Status(StatusPayload {
            status: job.status,
            job,
        }));
    }

    /// queued -> running. Returns false if the job was cancelled first.
    pub fn mark_running(&self) -> bool {
        let snapshot = {
            let mut job = self.job.lock();
            if job.status != JobStatus::Queued {
                return false;
            }
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            job.clone()
        };
        self.emit_status(snapshot);
        true
    }

    /// Request cooperative cancellation; false when already terminal
    pub fn cancel(&self) -> bool {
        let snapshot = {
            let mut job = self.job.lock();
            if job.status.is_terminal() {
                return false;
            }
            job.status = JobStatus::Cancelled;
            job.cancelled_at = Some(Utc::now());
            job.clone()
        };
        self.emit_status(snapshot);
        true
    }

    pub fn begin_book(&self, book_id: i64) {
        self.job.lock().current_book_id = Some(book_id);
    }

    /// Count one finished book and return the running totals
    pub fn record_book(&self, error: Option<String>) -> Progress {
        let mut job = self.job.lock();
        job.processed_count += 1;
        match error {
            Some(detail) => {
                job.failed_books += 1;
                job.last_error = Some(detail);
            }
            None => job.succeeded_books += 1,
        }
        Progress {
            processed: job.processed_count,
            succeeded: job.succeeded_books,
            failed: job.failed_books,
        }
    }

    /// Move to `status` unless another terminal status was written first, emit
    /// `done` and drop every subscriber sender.
    pub fn finish(&self, status: JobStatus) -> Job {
        let snapshot = {
            let mut job = self.job.lock();
            if !job.status.is_terminal() {
                job.status = status;
            }
            job.finished_at = Some(Utc::now());
            job.current_book_id = None;
            job.clone()
        };

        if let Some(subscribers) = self.subscribers.lock().take() {
            let done = JobEvent::Done(StatusPayload {
                status: snapshot.status,
                job: snapshot.clone(),
            });
            for tx in subscribers {
                // Dropped receivers are fine
                let _ = tx.send(done.clone());
            }
        }
        snapshot
    }

    /// Every event from now on, in emission order; empty once `done` has
    /// been emitted
    pub fn subscribe(&self) -> BoxStream<'static, JobEvent> {
        let receiver = {
            let mut guard = self.subscribers.lock();
            let Some(subscribers) = guard.as_mut() else {
                return futures::stream::empty().boxed();
            };
            let (tx, rx) = mpsc::unbounded_channel();
            subscribers.push(tx);
            rx
        };

        futures::stream::unfold(Some(receiver), |state| async move {
            let mut receiver = state?;
            let event = receiver.recv().await?;
            let next = if event.is_done() { None } else { Some(receiver) };
            Some((event, next))
        })
        .boxed()
    }
}

#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, Arc<JobHandle>>>>,
    max_finished: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_FINISHED_JOBS)
    }

    /// Keep at most `max_finished` terminal jobs around for polling
    pub fn with_capacity(max_finished: usize) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            max_finished,
        }
    }

    pub fn register(&self, job: Job) -> Arc<JobHandle> {
        let id = job.id;
        let handle = Arc::new(JobHandle::new(job));
        let mut jobs = self.jobs.write();
        jobs.insert(id, handle.clone());
        Self::evict_finished(&mut jobs, self.max_finished);
        handle
    }

    fn evict_finished(jobs: &mut HashMap<Uuid, Arc<JobHandle>>, max_finished: usize) {
        let mut finished: Vec<(Uuid, chrono::DateTime<Utc>)> = jobs
            .iter()
            .filter_map(|(id, handle)| {
                // A cancelled job is terminal before its task finishes the current book
                let job = handle.snapshot();
                job.finished_at.map(|at| (*id, at))
            })
            .collect();
        if finished.len() <= max_finished {
            return;
        }
        finished.sort_by_key(|(_, at)| *at);
        let excess = finished.len() - max_finished;
        for (id, _) in finished.into_iter().take(excess) {
            tracing::debug!("Evicting finished job {}", id);
            jobs.remove(&id);
        }
    }

    pub fn handle(&self, id: &Uuid) -> Option<Arc<JobHandle>> {
        self.jobs.read().get(id).cloned()
    }

    pub fn lookup(&self, id: &Uuid) -> Option<Job> {
        self.handle(id).map(|handle| handle.snapshot())
    }

    /// False if the job is unknown or already terminal
    pub fn cancel(&self, id: &Uuid) -> bool {
        self.handle(id).is_some_and(|handle| handle.cancel())
    }

    pub fn subscribe(&self, id: &Uuid) -> Result<BoxStream<'static, JobEvent>, EnrichmentError> {
        self.handle(id)
            .map(|handle| handle.subscribe())
            .ok_or_else(|| EnrichmentError::NotFound(format!("job {}", id)))
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}
