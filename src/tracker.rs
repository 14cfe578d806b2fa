//! Background polling of every active report job.
//!
//! The tracker owns one polling loop at most. It starts when the first job is
//! tracked, polls each active job in turn every interval, and goes idle once
//! the registry is empty again. Terminal jobs stay visible for a grace period
//! before they are dropped.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{Notify, mpsc},
    time::{self, MissedTickBehavior},
};

use crate::{
    api::{ApiError, AppraisalApi, JobStatusResponse, report_tags},
    config::TrackerCfg,
    jobs::{JobStatus, ReportJob},
    registry::SharedRegistry,
    store::StoreError,
};

/// Events emitted for the UI.
#[derive(Clone, Debug, PartialEq)]
pub enum TrackerEvent {
    /// Snapshot of every tracked job after a change.
    JobsChanged(Vec<ReportJob>),
    /// A report finished; property data should be re-read.
    Refresh { property_id: String },
    /// Informational message.
    Log(String),
}

/// Handle to the background tracker; cheap to clone.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn AppraisalApi>,
    registry: SharedRegistry<ReportJob>,
    events: mpsc::Sender<TrackerEvent>,
    cfg: TrackerCfg,
    /// Jobs a generation flow is polling itself; skipped here until released.
    claimed: Mutex<HashSet<String>>,
    /// Set while a polling loop exists.
    running: AtomicBool,
    /// Set once on teardown; late results are dropped after this.
    closed: AtomicBool,
    shutdown: Notify,
}

impl Tracker {
    pub fn new(
        api: Arc<dyn AppraisalApi>,
        registry: SharedRegistry<ReportJob>,
        events: mpsc::Sender<TrackerEvent>,
        cfg: TrackerCfg,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                registry,
                events,
                cfg,
                claimed: Mutex::new(HashSet::new()),
                running: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                shutdown: Notify::new(),
            }),
        }
    }

    /// Start watching a job, replacing any job for the same property.
    pub async fn track(&self, job: ReportJob) -> Result<(), StoreError> {
        let saved = self.inner.registry.lock().await.add_job(job).await;
        self.inner.emit_jobs().await;
        self.ensure_running();
        saved
    }

    /// Like [`Tracker::track`], but the caller polls the job itself. The
    /// loop leaves it alone until [`Tracker::release`] or `untrack`.
    pub async fn track_claimed(&self, job: ReportJob) -> Result<(), StoreError> {
        if let Ok(mut claimed) = self.inner.claimed.lock() {
            claimed.insert(job.job_id.clone());
        }
        self.track(job).await
    }

    /// Hand a claimed job over to the polling loop.
    pub fn release(&self, job_id: &str) {
        if let Ok(mut claimed) = self.inner.claimed.lock() {
            claimed.remove(job_id);
        }
    }

    /// Stop watching a job by job id or property id.
    pub async fn untrack(&self, id: &str) {
        self.inner.remove(id).await;
        let registry = self.inner.registry.lock().await;
        if let Ok(mut claimed) = self.inner.claimed.lock() {
            claimed.retain(|job_id| registry.get(job_id).is_some());
        }
    }

    /// Pick up jobs restored from storage.
    pub async fn resume(&self) {
        let count = self.inner.registry.lock().await.len();
        if count > 0 {
            tracing::info!("resuming {count} persisted report job(s)");
            self.inner.emit_jobs().await;
            self.ensure_running();
        }
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Stop polling. Results of requests already in flight are ignored.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.shutdown.notify_one();
    }

    /// Spawn the polling loop unless one is already running.
    fn ensure_running(&self) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run().await });
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        tracing::info!("job tracker started");
        let mut ticker = time::interval(self.cfg.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval() fires at once; the first poll waits a full period.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = ticker.tick() => {}
            }
            if self.closed.load(Ordering::SeqCst) {
                break;
            }

            self.poll_once().await;

            // Checked under the registry lock so a concurrent track() either
            // lands before this check or sees `running == false`.
            let registry = self.registry.lock().await;
            if registry.is_empty() {
                self.running.store(false, Ordering::SeqCst);
                tracing::info!("no report jobs left; tracker idle");
                return;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("job tracker stopped");
    }

    /// One pass over the active jobs, one request at a time.
    async fn poll_once(self: &Arc<Self>) {
        let mut jobs = self.registry.lock().await.active();
        if let Ok(claimed) = self.claimed.lock() {
            jobs.retain(|j| !claimed.contains(&j.job_id));
        }
        for job in jobs {
            let result = self.api.job_status(&job.status_url).await;
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            match result {
                Err(ApiError::NotFound) => {
                    tracing::info!("job {} no longer exists on the server", job.job_id);
                    self.remove(&job.job_id).await;
                }
                Err(e) => {
                    tracing::warn!("status check for job {} failed: {e}", job.job_id);
                }
                Ok(resp) => self.apply(&job, resp).await,
            }
        }
    }

    async fn apply(self: &Arc<Self>, job: &ReportJob, resp: JobStatusResponse) {
        let updated = {
            let mut registry = self.registry.lock().await;
            match registry.update(&job.job_id, |j| j.apply(&resp)).await {
                Ok(updated) => updated,
                Err(e) => {
                    tracing::warn!("failed to persist job {}: {e}", job.job_id);
                    registry.get(&job.job_id).cloned()
                }
            }
        };
        // Evicted by a newer job for the same property while we waited.
        let Some(updated) = updated else {
            return;
        };
        self.emit_jobs().await;

        match updated.status {
            JobStatus::Completed => {
                tracing::info!(
                    "report job {} completed for property {}",
                    updated.job_id,
                    updated.property_id
                );
                if let Err(e) = self.api.revalidate(&report_tags(&updated.property_id)).await {
                    tracing::warn!("cache revalidation failed: {e}");
                }
                self.send(TrackerEvent::Refresh {
                    property_id: updated.property_id.clone(),
                })
                .await;
                self.remove_after(updated.job_id, self.cfg.completed_grace());
            }
            JobStatus::Failed => {
                let reason = updated.error.clone().unwrap_or_default();
                tracing::warn!("report job {} failed: {reason}", updated.job_id);
                self.send(TrackerEvent::Log(format!(
                    "Report for {} failed: {reason}",
                    updated.property_id
                )))
                .await;
                self.remove_after(updated.job_id, self.cfg.failed_grace());
            }
            JobStatus::Pending | JobStatus::Processing => {}
        }
    }

    /// Drop a terminal job once it has been on screen long enough.
    fn remove_after(self: &Arc<Self>, job_id: String, grace: Duration) {
        let inner = self.clone();
        tokio::spawn(async move {
            time::sleep(grace).await;
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            inner.remove(&job_id).await;
        });
    }

    async fn remove(&self, id: &str) {
        if let Err(e) = self.registry.lock().await.remove_job(id).await {
            tracing::warn!("failed to persist removal of {id}: {e}");
        }
        self.emit_jobs().await;
    }

    async fn emit_jobs(&self) {
        let jobs = self.registry.lock().await.list().to_vec();
        self.send(TrackerEvent::JobsChanged(jobs)).await;
    }

    async fn send(&self, ev: TrackerEvent) {
        let _ = self.events.send(ev).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::fake::ScriptedApi,
        jobs::ServerStatus,
        registry::{JobRegistry, REPORT_JOBS_KEY},
        store::MemoryStore,
    };

    struct Harness {
        api: Arc<ScriptedApi>,
        registry: SharedRegistry<ReportJob>,
        tracker: Tracker,
        events: mpsc::Receiver<TrackerEvent>,
    }

    fn harness() -> Harness {
        let api = Arc::new(ScriptedApi::default());
        let store = Arc::new(MemoryStore::default());
        let registry =
            JobRegistry::new(store, REPORT_JOBS_KEY, chrono::Duration::minutes(10)).shared();
        let (tx, rx) = mpsc::channel(1024);
        let tracker = Tracker::new(api.clone(), registry.clone(), tx, TrackerCfg::default());
        Harness {
            api,
            registry,
            tracker,
            events: rx,
        }
    }

    fn job(job_id: &str, property_id: &str) -> ReportJob {
        ReportJob::new(job_id.into(), property_id.into(), format!("/status/{job_id}"))
    }

    async fn advance(ms: u64) {
        time::sleep(Duration::from_millis(ms)).await;
    }

    async fn tracked(h: &Harness, job_id: &str) -> Option<ReportJob> {
        h.registry.lock().await.get(job_id).cloned()
    }

    fn drain(rx: &mut mpsc::Receiver<TrackerEvent>) -> Vec<TrackerEvent> {
        let mut out = vec![];
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn status_sequence_maps_and_removes_after_grace() {
        let mut h = harness();
        for s in [
            ServerStatus::Queued,
            ServerStatus::FetchingData,
            ServerStatus::GeneratingPdf,
            ServerStatus::Completed,
        ] {
            h.api.push_status(s);
        }
        h.tracker.track(job("j1", "p1")).await.unwrap();

        advance(3_001).await;
        assert_eq!(tracked(&h, "j1").await.unwrap().status, JobStatus::Pending);
        advance(3_000).await;
        assert_eq!(tracked(&h, "j1").await.unwrap().status, JobStatus::Processing);
        advance(3_000).await;
        let j = tracked(&h, "j1").await.unwrap();
        assert_eq!(j.status, JobStatus::Processing);
        assert_eq!(j.stage.as_deref(), Some("generating_pdf"));

        advance(3_000).await;
        let j = tracked(&h, "j1").await.unwrap();
        assert_eq!(j.status, JobStatus::Completed);
        assert_eq!(j.progress, 100);
        assert_eq!(h.api.revalidated.lock().unwrap().len(), 1);
        assert!(drain(&mut h.events).contains(&TrackerEvent::Refresh {
            property_id: "p1".into()
        }));

        // Still on screen just before the grace period ends.
        advance(1_998).await;
        assert!(tracked(&h, "j1").await.is_some());
        advance(2).await;
        assert!(tracked(&h, "j1").await.is_none());

        // Next tick finds nothing to do and the loop exits.
        advance(3_000).await;
        assert!(!h.tracker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_removes_without_failing() {
        let mut h = harness();
        h.api.push_status_response(Err(ApiError::NotFound));
        h.tracker.track(job("x", "p1")).await.unwrap();

        advance(3_001).await;
        assert!(tracked(&h, "x").await.is_none());
        let saw_failed = drain(&mut h.events).iter().any(|ev| match ev {
            TrackerEvent::JobsChanged(jobs) => jobs.iter().any(|j| j.status == JobStatus::Failed),
            _ => false,
        });
        assert!(!saw_failed);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_keep_polling_without_mutation() {
        let h = harness();
        h.api.push_status_response(Err(ApiError::Status {
            code: 502,
            message: "bad gateway".into(),
        }));
        h.api.push_status_response(Err(ApiError::Transport("reset".into())));
        h.api.push_status(ServerStatus::DataCollected);
        h.tracker.track(job("j1", "p1")).await.unwrap();

        advance(3_001).await;
        assert_eq!(tracked(&h, "j1").await.unwrap().stage, None);
        advance(3_000).await;
        assert_eq!(tracked(&h, "j1").await.unwrap().stage, None);
        advance(3_000).await;
        assert_eq!(tracked(&h, "j1").await.unwrap().status, JobStatus::Processing);
        assert_eq!(h.api.status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_shows_reason_for_longer_grace() {
        let h = harness();
        h.api.push_status_response(Ok(JobStatusResponse {
            status: ServerStatus::Failed,
            message: Some("No rental data".into()),
            ..JobStatusResponse::default()
        }));
        h.tracker.track(job("j1", "p1")).await.unwrap();

        advance(3_001).await;
        let j = tracked(&h, "j1").await.unwrap();
        assert_eq!(j.status, JobStatus::Failed);
        assert_eq!(j.error.as_deref(), Some("No rental data"));

        advance(4_998).await;
        assert!(tracked(&h, "j1").await.is_some());
        advance(2).await;
        assert!(tracked(&h, "j1").await.is_none());
        assert!(h.api.revalidated.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn one_loop_polls_each_job_once_per_tick() {
        let h = harness();
        h.api.push_status(ServerStatus::Queued);
        h.tracker.track(job("j1", "p1")).await.unwrap();
        h.tracker.track(job("j2", "p2")).await.unwrap();
        h.tracker.resume().await;
        h.tracker.resume().await;

        advance(3_001).await;
        assert_eq!(h.api.status_calls.load(Ordering::SeqCst), 2);
        advance(3_000).await;
        assert_eq!(h.api.status_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_restarts_after_going_idle() {
        let h = harness();
        h.api.push_status_response(Err(ApiError::NotFound));
        h.tracker.track(job("j1", "p1")).await.unwrap();
        advance(3_001).await;
        assert!(!h.tracker.is_running());

        h.api.statuses.lock().unwrap().clear();
        h.api.push_status(ServerStatus::Queued);
        h.tracker.track(job("j2", "p2")).await.unwrap();
        assert!(h.tracker.is_running());
        advance(3_001).await;
        assert_eq!(tracked(&h, "j2").await.unwrap().stage.as_deref(), Some("queued"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_polling() {
        let h = harness();
        h.api.push_status(ServerStatus::Completed);
        h.tracker.track(job("j1", "p1")).await.unwrap();
        h.tracker.shutdown();

        advance(10_000).await;
        assert_eq!(h.api.status_calls.load(Ordering::SeqCst), 0);
        assert_eq!(tracked(&h, "j1").await.unwrap().status, JobStatus::Pending);
        assert!(!h.tracker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn untrack_by_property_id() {
        let h = harness();
        h.api.push_status(ServerStatus::Queued);
        h.tracker.track(job("j1", "p1")).await.unwrap();
        h.tracker.untrack("p1").await;
        assert!(h.registry.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn results_landing_after_shutdown_are_ignored() {
        let mut h = harness();
        let gate = h.api.gate_statuses();
        h.api.push_status(ServerStatus::Completed);
        h.tracker.track(job("j1", "p1")).await.unwrap();
        drain(&mut h.events);

        advance(3_001).await;
        // The first status request is parked on the gate.
        assert_eq!(h.api.status_calls.load(Ordering::SeqCst), 1);
        h.tracker.shutdown();
        gate.notify_one();
        advance(10_000).await;

        assert_eq!(tracked(&h, "j1").await.unwrap().status, JobStatus::Pending);
        assert!(drain(&mut h.events).is_empty());
        assert!(h.api.revalidated.lock().unwrap().is_empty());
        assert_eq!(h.api.status_calls.load(Ordering::SeqCst), 1);
        assert!(!h.tracker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn claimed_jobs_are_polled_only_after_release() {
        let h = harness();
        h.api.push_status(ServerStatus::Queued);
        h.tracker.track_claimed(job("j1", "p1")).await.unwrap();

        advance(6_001).await;
        assert_eq!(h.api.status_calls.load(Ordering::SeqCst), 0);
        assert!(h.tracker.is_running());

        h.tracker.release("j1");
        advance(3_000).await;
        assert_eq!(h.api.status_calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracked(&h, "j1").await.unwrap().stage.as_deref(), Some("queued"));
    }

    #[tokio::test(start_paused = true)]
    async fn untracking_drops_the_claim() {
        let h = harness();
        h.api.push_status(ServerStatus::Queued);
        h.tracker.track_claimed(job("j1", "p1")).await.unwrap();
        h.tracker.untrack("p1").await;

        h.tracker.track(job("j1", "p1")).await.unwrap();
        advance(3_001).await;
        assert_eq!(h.api.status_calls.load(Ordering::SeqCst), 1);
    }
}
