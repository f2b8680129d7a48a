//! Crawl job lifecycle tracking.
//!
//! One record per gallery, overwritten when a new job starts. `idle` is the
//! reported default when no job has ever run. Only the crawl orchestrator
//! mutates state; everything else reads snapshots for status reporting.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Done,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrawlJob {
    pub gallery_id: String,
    pub state: JobState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Populated on `done`; absent for `idle`/`running`/`error`.
    pub posts_indexed: Option<usize>,
    pub message: Option<String>,
}

impl CrawlJob {
    fn idle(gallery_id: &str) -> Self {
        Self {
            gallery_id: gallery_id.to_string(),
            state: JobState::Idle,
            started_at: None,
            finished_at: None,
            posts_indexed: None,
            message: None,
        }
    }
}

/// Tracks the latest crawl job per gallery.
#[derive(Default)]
pub struct JobTracker {
    jobs: Mutex<HashMap<String, CrawlJob>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transitions the gallery to `running`, overwriting any terminal job.
    /// Rejects with `CrawlAlreadyRunning` when a job is still in flight:
    /// duplicates are refused, never queued.
    pub fn begin(&self, gallery_id: &str) -> Result<(), PipelineError> {
        let mut jobs = self.jobs.lock();
        if let Some(existing) = jobs.get(gallery_id)
            && existing.state == JobState::Running
        {
            return Err(PipelineError::CrawlAlreadyRunning(gallery_id.to_string()));
        }
        jobs.insert(
            gallery_id.to_string(),
            CrawlJob {
                gallery_id: gallery_id.to_string(),
                state: JobState::Running,
                started_at: Some(Utc::now()),
                finished_at: None,
                posts_indexed: None,
                message: None,
            },
        );
        Ok(())
    }

    /// `running → done`, recording what the crawl achieved (possibly zero
    /// posts or a partial-failure message).
    pub fn complete(&self, gallery_id: &str, posts_indexed: usize, message: &str) {
        let mut jobs = self.jobs.lock();
        if let Some(job) = jobs.get_mut(gallery_id) {
            job.state = JobState::Done;
            job.finished_at = Some(Utc::now());
            job.posts_indexed = Some(posts_indexed);
            job.message = Some(message.to_string());
        }
    }

    /// `running → error`, for total failures before any post was fetched.
    /// `posts_indexed` stays unset.
    pub fn fail(&self, gallery_id: &str, message: &str) {
        let mut jobs = self.jobs.lock();
        if let Some(job) = jobs.get_mut(gallery_id) {
            job.state = JobState::Error;
            job.finished_at = Some(Utc::now());
            job.posts_indexed = None;
            job.message = Some(message.to_string());
        }
    }

    /// Snapshot of the gallery's latest job, `idle` when none exists.
    pub fn status_of(&self, gallery_id: &str) -> CrawlJob {
        self.jobs
            .lock()
            .get(gallery_id)
            .cloned()
            .unwrap_or_else(|| CrawlJob::idle(gallery_id))
    }

    /// Number of jobs currently running.
    pub fn running_count(&self) -> usize {
        self.jobs
            .lock()
            .values()
            .filter(|j| j.state == JobState::Running)
            .count()
    }
}
