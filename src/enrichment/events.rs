//! Lifecycle events published by a running job

use super::{CandidateMatch, Job, JobStatus};
use serde::Serialize;

/// Running totals attached to every per-book result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusPayload {
    pub status: JobStatus,
    pub job: Job,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookStepPayload {
    pub book_id: i64,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookCompletedPayload {
    pub book_id: i64,
    pub title: String,
    pub author: String,
    pub selected: CandidateMatch,
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub progress: Progress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookFailedPayload {
    pub book_id: i64,
    pub title: String,
    pub author: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<CandidateMatch>,
    #[serde(flatten)]
    pub progress: Progress,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Status(StatusPayload),
    BookStep(BookStepPayload),
    BookCompleted(BookCompletedPayload),
    BookFailed(BookFailedPayload),
    Done(StatusPayload),
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Status(_) => "status",
            JobEvent::BookStep(_) => "book_step",
            JobEvent::BookCompleted(_) => "book_completed",
            JobEvent::BookFailed(_) => "book_failed",
            JobEvent::Done(_) => "done",
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        let value = match self {
            JobEvent::Status(p) | JobEvent::Done(p) => serde_json::to_value(p),
            JobEvent::BookStep(p) => serde_json::to_value(p),
            JobEvent::BookCompleted(p) => serde_json::to_value(p),
            JobEvent::BookFailed(p) => serde_json::to_value(p),
        };
        value.unwrap_or_default()
    }

    pub fn is_done(&self) -> bool {
        matches!(self, JobEvent::Done(_))
    }

    /// Whether this event reports the end of one book
    pub fn is_book_result(&self) -> bool {
        matches!(self, JobEvent::BookCompleted(_) | JobEvent::BookFailed(_))
    }

    pub fn book_id(&self) -> Option<i64> {
        match self {
            JobEvent::BookStep(p) => Some(p.book_id),
            JobEvent::BookCompleted(p) => Some(p.book_id),
            JobEvent::BookFailed(p) => Some(p.book_id),
            JobEvent::Status(_) | JobEvent::Done(_) => None,
        }
    }

    /// Final status carried by a `done` event
    pub fn final_status(&self) -> Option<JobStatus> {
        match self {
            JobEvent::Done(p) => Some(p.status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_failed_payload_shape() {
        let event = JobEvent::BookFailed(BookFailedPayload {
            book_id: 7,
            title: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
            detail: "no results".to_string(),
            selected: None,
            progress: Progress {
                processed: 1,
                succeeded: 0,
                failed: 1,
            },
        });

        assert_eq!(event.name(), "book_failed");
        let payload = event.payload();
        assert_eq!(payload["book_id"], 7);
        assert_eq!(payload["detail"], "no results");
        assert_eq!(payload["processed"], 1);
        assert!(payload.get("selected").is_none());
    }

    #[test]
    fn test_done_carries_status() {
        let mut job = Job::new(0);
        job.status = JobStatus::Cancelled;
        let event = JobEvent::Done(StatusPayload {
            status: job.status,
            job,
        });
        assert!(event.is_done());
        assert_eq!(event.final_status(), Some(JobStatus::Cancelled));
        assert_eq!(event.payload()["status"], "cancelled");
    }
}
