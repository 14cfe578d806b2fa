//! The set of jobs this client is tracking, mirrored to a key/value store.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::{
    jobs::TrackedJob,
    store::{KeyValueStore, StoreError},
};

/// Storage key for report-generation jobs.
pub const REPORT_JOBS_KEY: &str = "report_jobs";
/// Storage key for pending property creations.
pub const PENDING_PROPERTIES_KEY: &str = "pending_properties";

/// Registry shared between the worker, pollers and flows.
pub type SharedRegistry<J> = Arc<Mutex<JobRegistry<J>>>;

/// Active jobs keyed by target; at most one job per target id.
pub struct JobRegistry<J> {
    store: Arc<dyn KeyValueStore>,
    key: String,
    /// Persisted jobs older than this are dropped on load.
    stale_after: Duration,
    jobs: Vec<J>,
}

impl<J: TrackedJob> JobRegistry<J> {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>, stale_after: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            stale_after,
            jobs: Vec::new(),
        }
    }

    /// Wrap in the shared handle.
    pub fn shared(self) -> SharedRegistry<J> {
        Arc::new(Mutex::new(self))
    }

    /// Restore persisted jobs; returns how many survived.
    pub async fn load(&mut self) -> usize {
        self.load_at(Utc::now()).await
    }

    /// Restore persisted jobs as of `now`. Terminal and stale entries are
    /// leftovers from an earlier session and are dropped; malformed content is
    /// dropped as a whole.
    pub async fn load_at(&mut self, now: DateTime<Utc>) -> usize {
        let raw = match self.store.get(&self.key).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("job store unreadable for {}: {e}", self.key);
                None
            }
        };

        let persisted: Vec<J> = match raw.as_deref().map(serde_json::from_str::<Vec<J>>) {
            None => Vec::new(),
            Some(Ok(jobs)) => jobs,
            Some(Err(e)) => {
                tracing::warn!("discarding malformed {} entry: {e}", self.key);
                Vec::new()
            }
        };
        let total = persisted.len();

        self.jobs.clear();
        for job in persisted {
            if job.status().is_terminal() || now - job.started_at() > self.stale_after {
                continue;
            }
            // A hand-edited file may hold two jobs for one target; last one wins.
            self.jobs.retain(|j| j.target_id() != job.target_id());
            self.jobs.push(job);
        }

        tracing::info!(
            "restored {} of {} persisted {}",
            self.jobs.len(),
            total,
            self.key
        );
        if raw.is_some() && let Err(e) = self.persist().await {
            tracing::warn!("failed to rewrite {}: {e}", self.key);
        }
        self.jobs.len()
    }

    /// Insert a job, evicting any earlier job for the same target.
    pub async fn add_job(&mut self, job: J) -> Result<(), StoreError> {
        self.jobs.retain(|j| j.target_id() != job.target_id());
        tracing::info!("tracking job {} for {}", job.job_id(), job.target_id());
        self.jobs.push(job);
        self.persist().await
    }

    /// Remove by job id or by target id. Returns whether anything was removed.
    pub async fn remove_job(&mut self, id: &str) -> Result<bool, StoreError> {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.job_id() != id && j.target_id() != id);
        if self.jobs.len() == before {
            return Ok(false);
        }
        tracing::info!("stopped tracking {id}");
        self.persist().await?;
        Ok(true)
    }

    /// Mutate the job with `job_id` in place. Returns the updated copy, or
    /// `None` when the job is no longer tracked.
    pub async fn update<F>(&mut self, job_id: &str, f: F) -> Result<Option<J>, StoreError>
    where
        F: FnOnce(&mut J),
    {
        let Some(job) = self.jobs.iter_mut().find(|j| j.job_id() == job_id) else {
            return Ok(None);
        };
        f(job);
        let updated = job.clone();
        self.persist().await?;
        Ok(Some(updated))
    }

    pub fn list(&self) -> &[J] {
        &self.jobs
    }

    pub fn get(&self, job_id: &str) -> Option<&J> {
        self.jobs.iter().find(|j| j.job_id() == job_id)
    }

    /// Jobs that still need polling.
    pub fn active(&self) -> Vec<J> {
        self.jobs
            .iter()
            .filter(|j| !j.status().is_terminal())
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Write the whole set, or clear the key when nothing is tracked.
    async fn persist(&self) -> Result<(), StoreError> {
        if self.jobs.is_empty() {
            return self.store.remove(&self.key).await;
        }
        let data = serde_json::to_string(&self.jobs)?;
        self.store.set(&self.key, data).await
    }
}
