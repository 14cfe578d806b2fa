//! Background worker: owns the API client, both registries, the tracker and
//! every running generation flow.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};
use tokio::sync::mpsc;

use crate::{
    api::{AppraisalApi, HttpApi},
    config::Config,
    generate::{FlowUpdate, ReportGenerator},
    jobs::{PendingJob, Property, ReportJob},
    registry::{JobRegistry, PENDING_PROPERTIES_KEY, REPORT_JOBS_KEY, SharedRegistry},
    store::{FileStore, KeyValueStore},
    tracker::{Tracker, TrackerEvent},
};

/// Commands sent from the UI to the worker.
#[derive(Debug)]
pub enum WorkerCmd {
    /// Re-read the property list.
    RefreshProperties,
    /// Create a property from a free-form address.
    CreateProperty { address_common_name: String },
    /// Start a report generation for a property.
    GenerateReport { property_id: String },
    /// Apply updated settings (already saved by the UI).
    SaveSettings(Config),
}

/// Events emitted by the worker for UI updates.
#[derive(Clone, Debug)]
pub enum WorkerEvent {
    /// Server-confirmed property list.
    PropertiesLoaded(Vec<Property>),
    /// Property creations not yet visible in the server list.
    PendingChanged(Vec<PendingJob>),
    /// Tracked report jobs.
    JobsChanged(Vec<ReportJob>),
    /// Progress of a user-initiated generation.
    Flow(FlowUpdate),
    /// Informational log message.
    Log(String),
    /// User-visible error message.
    Error(String),
}

/// Main worker loop: build the backend client, then handle commands.
pub async fn run(mut rx: mpsc::Receiver<WorkerCmd>, tx: mpsc::Sender<WorkerEvent>, cfg: Config) {
    tracing::info!("worker started");

    let api = match HttpApi::new(&cfg.api) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            tracing::error!("api client init failed: {e}");
            let _ = tx
                .send(WorkerEvent::Error(format!("api client init failed: {e}")))
                .await;
            return;
        }
    };
    let store = Arc::new(FileStore::new(&cfg.storage.jobs_path));
    let mut worker = Worker::start(api, store, tx, cfg).await;

    worker.refresh().await;
    while let Some(cmd) = rx.recv().await {
        worker.handle(cmd).await;
    }
    worker.stop();
    tracing::info!("worker stopped");
}

/// Worker state shared by the command loop and the tasks it spawns.
pub struct Worker {
    api: Arc<dyn AppraisalApi>,
    reports: SharedRegistry<ReportJob>,
    pending: SharedRegistry<PendingJob>,
    tracker: Tracker,
    tx: mpsc::Sender<WorkerEvent>,
    flow_tx: mpsc::Sender<FlowUpdate>,
    cfg: Config,
    /// Properties with a generation flow running.
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Worker {
    /// Restore persisted jobs and start the background tasks.
    pub async fn start(
        api: Arc<dyn AppraisalApi>,
        store: Arc<dyn KeyValueStore>,
        tx: mpsc::Sender<WorkerEvent>,
        cfg: Config,
    ) -> Self {
        let stale_after = cfg.tracker.stale_after();
        let mut reports = JobRegistry::new(store.clone(), REPORT_JOBS_KEY, stale_after);
        let restored = reports.load().await;
        let mut pending = JobRegistry::new(store, PENDING_PROPERTIES_KEY, stale_after);
        let restored_pending = pending.load().await;
        tracing::info!("restored {restored} report job(s), {restored_pending} pending propert(ies)");
        let reports = reports.shared();
        let pending = pending.shared();

        let (tracker_tx, tracker_rx) = mpsc::channel(256);
        let tracker = Tracker::new(api.clone(), reports.clone(), tracker_tx, cfg.tracker.clone());
        tokio::spawn(forward_tracker_events(
            tracker_rx,
            api.clone(),
            pending.clone(),
            tx.clone(),
        ));

        let (flow_tx, mut flow_rx) = mpsc::channel::<FlowUpdate>(256);
        let flow_events = tx.clone();
        tokio::spawn(async move {
            while let Some(update) = flow_rx.recv().await {
                if flow_events.send(WorkerEvent::Flow(update)).await.is_err() {
                    break;
                }
            }
        });

        emit_pending(&pending, &tx).await;
        tracker.resume().await;

        Self {
            api,
            reports,
            pending,
            tracker,
            tx,
            flow_tx,
            cfg,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn handle(&mut self, cmd: WorkerCmd) {
        match cmd {
            WorkerCmd::SaveSettings(new_cfg) => {
                tracing::info!("settings updated");
                self.cfg = new_cfg;
                let _ = self.tx.send(WorkerEvent::Log("settings updated".into())).await;
            }
            WorkerCmd::RefreshProperties => self.refresh().await,
            WorkerCmd::CreateProperty {
                address_common_name,
            } => self.create_property(address_common_name).await,
            WorkerCmd::GenerateReport { property_id } => self.generate(property_id).await,
        }
    }

    pub async fn refresh(&self) {
        refresh_properties(self.api.as_ref(), &self.pending, &self.tx).await;
    }

    /// Stop background polling.
    pub fn stop(&self) {
        self.tracker.shutdown();
    }

    async fn create_property(&self, address_common_name: String) {
        let address = address_common_name.trim().to_string();
        if address.is_empty() {
            let _ = self
                .tx
                .send(WorkerEvent::Error("address must not be empty".into()))
                .await;
            return;
        }
        tracing::info!("create property: {address}");

        let job = PendingJob::new(address.clone());
        let job_id = job.job_id.clone();
        if let Err(e) = self.pending.lock().await.add_job(job).await {
            tracing::warn!("failed to persist pending property: {e}");
        }
        emit_pending(&self.pending, &self.tx).await;

        match self.api.create_property(&address).await {
            Ok(property_id) => {
                tracing::info!("property {property_id} created for {address}");
                let saved = self
                    .pending
                    .lock()
                    .await
                    .update(&job_id, |j| j.property_id = Some(property_id.clone()))
                    .await;
                if let Err(e) = saved {
                    tracing::warn!("failed to persist pending property: {e}");
                }
                let _ = self
                    .tx
                    .send(WorkerEvent::Log(format!("Property created: {address}")))
                    .await;
                self.refresh().await;
            }
            Err(e) => {
                tracing::error!("create property failed: {e}");
                if let Err(e) = self.pending.lock().await.remove_job(&job_id).await {
                    tracing::warn!("failed to persist pending removal: {e}");
                }
                emit_pending(&self.pending, &self.tx).await;
                let _ = self
                    .tx
                    .send(WorkerEvent::Error(format!("create property failed: {e}")))
                    .await;
            }
        }
    }

    async fn generate(&self, property_id: String) {
        let Some(guard) = InFlight::claim(&self.in_flight, &property_id) else {
            let _ = self
                .tx
                .send(WorkerEvent::Log(format!(
                    "A report is already being generated for {property_id}"
                )))
                .await;
            return;
        };
        tracing::info!("generate report: {property_id}");

        let mut flow = ReportGenerator::new(
            self.api.clone(),
            self.reports.clone(),
            self.cfg.generation.clone(),
            self.cfg.branding.clone(),
            self.flow_tx.clone(),
        )
        .with_tracker(self.tracker.clone());
        let api = self.api.clone();
        let pending = self.pending.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let result = flow.run(&property_id).await;
            drop(guard);

            match result {
                Ok(outcome) => {
                    let _ = tx
                        .send(WorkerEvent::Log(format!(
                            "Report ready for {}",
                            outcome.property_id
                        )))
                        .await;
                    refresh_properties(api.as_ref(), &pending, &tx).await;
                }
                Err(e) => {
                    for attempt in flow.history() {
                        let _ = tx
                            .send(WorkerEvent::Log(format!(
                                "attempt {} failed: {}",
                                attempt.attempt_number, attempt.message
                            )))
                            .await;
                    }
                    let _ = tx.send(WorkerEvent::Error(e.to_string())).await;
                }
            }
        });
    }
}

/// Marks a property as having a running flow. The mark is cleared on drop,
/// including when the flow task panics.
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    property_id: String,
}

impl InFlight {
    /// `None` if the property already has a running flow.
    fn claim(set: &Arc<Mutex<HashSet<String>>>, property_id: &str) -> Option<Self> {
        let inserted = set
            .lock()
            .map(|mut s| s.insert(property_id.to_string()))
            .unwrap_or(false);
        inserted.then(|| Self {
            set: set.clone(),
            property_id: property_id.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.property_id);
        }
    }
}

/// Relay tracker events; a finished report triggers a property refresh.
async fn forward_tracker_events(
    mut rx: mpsc::Receiver<TrackerEvent>,
    api: Arc<dyn AppraisalApi>,
    pending: SharedRegistry<PendingJob>,
    tx: mpsc::Sender<WorkerEvent>,
) {
    while let Some(ev) = rx.recv().await {
        match ev {
            TrackerEvent::JobsChanged(jobs) => {
                let _ = tx.send(WorkerEvent::JobsChanged(jobs)).await;
            }
            TrackerEvent::Refresh { property_id } => {
                tracing::info!("refreshing after report for {property_id}");
                refresh_properties(api.as_ref(), &pending, &tx).await;
            }
            TrackerEvent::Log(msg) => {
                let _ = tx.send(WorkerEvent::Log(msg)).await;
            }
        }
    }
}

/// Load the property list and drop pending creations the server now lists.
async fn refresh_properties(
    api: &dyn AppraisalApi,
    pending: &SharedRegistry<PendingJob>,
    tx: &mpsc::Sender<WorkerEvent>,
) {
    match api.list_properties().await {
        Ok(properties) => {
            tracing::info!("loaded {} properties", properties.len());
            let listed: HashSet<&str> = properties.iter().map(|p| p.id.as_str()).collect();
            {
                let mut pending = pending.lock().await;
                let confirmed: Vec<String> = pending
                    .list()
                    .iter()
                    .filter(|j| j.property_id.as_deref().is_some_and(|id| listed.contains(id)))
                    .map(|j| j.job_id.clone())
                    .collect();
                for job_id in confirmed {
                    if let Err(e) = pending.remove_job(&job_id).await {
                        tracing::warn!("failed to persist pending removal: {e}");
                    }
                }
            }
            emit_pending(pending, tx).await;
            let _ = tx.send(WorkerEvent::PropertiesLoaded(properties)).await;
        }
        Err(e) => {
            tracing::error!("property list failed: {e}");
            let _ = tx
                .send(WorkerEvent::Error(format!("property list failed: {e}")))
                .await;
        }
    }
}

async fn emit_pending(pending: &SharedRegistry<PendingJob>, tx: &mpsc::Sender<WorkerEvent>) {
    let jobs = pending.lock().await.list().to_vec();
    let _ = tx.send(WorkerEvent::PendingChanged(jobs)).await;
}
