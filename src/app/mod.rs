//! TUI event loop and application state.

mod handlers;
mod render;

use anyhow::Result;
use crossterm::event::{self, Event};
use std::{collections::HashMap, path::PathBuf, time::Duration};
use tokio::sync::mpsc;

use crate::{
    config::Config,
    events::UiState,
    generate::{FlowState, FlowUpdate},
    input::InputBoxState,
    jobs::{PendingJob, Property, ReportJob},
    merge::merge_with_optimistic,
    shortcuts::Shortcuts,
    ui::Tui,
    worker::{self, WorkerCmd, WorkerEvent},
};

use handlers::{handle_key, is_ctrl_c};
use render::draw;

/// State shared by input handling and rendering.
pub struct App {
    pub cfg_path: PathBuf,
    pub cfg: Config,
    pub ui: UiState,
    /// Server-confirmed properties.
    pub properties: Vec<Property>,
    /// Property creations not yet confirmed by a list refresh.
    pub pending: Vec<PendingJob>,
    /// Report jobs the background tracker knows about.
    pub jobs: Vec<ReportJob>,
    /// Latest generation flow update per property.
    pub flows: HashMap<String, FlowUpdate>,
    pub worker_tx: mpsc::Sender<WorkerCmd>,
    pub worker_rx: mpsc::Receiver<WorkerEvent>,

    /// Branding screen edit buffers.
    pub company_name: String,
    pub company_logo_url: String,

    /// Open input popup, if any.
    pub input_box: Option<InputBoxState>,
    pub shortcuts: Shortcuts,
}

pub async fn run_app(terminal: &mut Tui) -> Result<()> {
    let cfg_path = PathBuf::from("config.toml");
    let cfg = Config::load_or_default(&cfg_path)?;
    let shortcuts = Shortcuts::load_or_default("shortcut.toml")?;

    let (tx_cmd, rx_cmd) = mpsc::channel::<WorkerCmd>(64);
    let (tx_ev, rx_ev) = mpsc::channel::<WorkerEvent>(256);
    tokio::spawn(worker::run(rx_cmd, tx_ev, cfg.clone()));

    let mut app = App::new(cfg_path, cfg, shortcuts, tx_cmd, rx_ev);
    app.ui.status = "Loading properties...".into();

    loop {
        terminal.draw(|f| draw(f, &app))?;

        while let Ok(ev) = app.worker_rx.try_recv() {
            app.handle_worker_event(ev);
        }

        if event::poll(Duration::from_millis(50))?
            && let Event::Key(k) = event::read()?
        {
            if is_ctrl_c(&k) {
                break;
            }
            if handle_key(&mut app, k).await? {
                break;
            }
        }
    }
    Ok(())
}

impl App {
    pub fn new(
        cfg_path: PathBuf,
        cfg: Config,
        shortcuts: Shortcuts,
        worker_tx: mpsc::Sender<WorkerCmd>,
        worker_rx: mpsc::Receiver<WorkerEvent>,
    ) -> Self {
        Self {
            company_name: cfg.branding.company_name.clone(),
            company_logo_url: cfg.branding.company_logo_url.clone(),
            cfg_path,
            cfg,
            ui: UiState::default(),
            properties: vec![],
            pending: vec![],
            jobs: vec![],
            flows: HashMap::new(),
            worker_tx,
            worker_rx,
            input_box: None,
            shortcuts,
        }
    }

    /// Server rows first, then optimistic rows for creations still in flight.
    pub fn rows(&self) -> Vec<Property> {
        let optimistic: Vec<Property> = self
            .pending
            .iter()
            .map(PendingJob::optimistic_property)
            .collect();
        merge_with_optimistic(&self.properties, &optimistic)
    }

    pub fn selected_property(&self) -> Option<Property> {
        self.rows().into_iter().nth(self.ui.selected)
    }

    /// Tracked job for a property, if any.
    pub fn job_for(&self, property_id: &str) -> Option<&ReportJob> {
        self.jobs.iter().find(|j| j.property_id == property_id)
    }

    /// Best known report URL for a property.
    pub fn pdf_url_for(&self, property_id: &str) -> Option<String> {
        if let Some(FlowUpdate {
            state: FlowState::Completed { pdf_url: Some(url) },
            ..
        }) = self.flows.get(property_id)
        {
            return Some(url.clone());
        }
        self.job_for(property_id).and_then(|j| j.pdf_url.clone())
    }

    fn select_property(&mut self, property_id: &str) {
        if let Some(idx) = self.rows().iter().position(|p| p.id == property_id) {
            self.ui.selected = idx;
        }
    }

    fn clamp_selection(&mut self) {
        let len = self.rows().len();
        if self.ui.selected >= len {
            self.ui.selected = len.saturating_sub(1);
        }
    }

    /// Fold one worker event into UI state.
    pub fn handle_worker_event(&mut self, ev: WorkerEvent) {
        match ev {
            WorkerEvent::PropertiesLoaded(properties) => {
                self.properties = properties;
                self.clamp_selection();
                self.ui.status = format!("Loaded {} properties", self.properties.len());
            }
            WorkerEvent::PendingChanged(pending) => {
                self.pending = pending;
                self.clamp_selection();
            }
            WorkerEvent::JobsChanged(jobs) => self.jobs = jobs,
            WorkerEvent::Flow(update) => {
                self.ui.status = update.text.clone();
                match &update.state {
                    FlowState::Completed { .. } => {
                        self.ui.error = None;
                        let property_id = update.property_id.clone();
                        self.select_property(&property_id);
                        self.ui.push_log(format!("Report generated for {property_id}"));
                    }
                    FlowState::FailedFinal { message } | FlowState::TimedOut { message } => {
                        self.ui.error = Some(message.clone());
                    }
                    _ => {}
                }
                self.flows.insert(update.property_id.clone(), update);
            }
            WorkerEvent::Log(line) => self.ui.push_log(line),
            WorkerEvent::Error(msg) => {
                self.ui.push_log(format!("error: {msg}"));
                self.ui.error = Some(msg);
            }
        }
    }

    pub async fn request_refresh(&mut self) -> Result<()> {
        tracing::info!("refresh requested");
        self.worker_tx.send(WorkerCmd::RefreshProperties).await?;
        self.ui.status = "Refreshing properties...".into();
        self.ui.error = None;
        Ok(())
    }

    /// Reset branding edit buffers to the saved values.
    fn reload_branding_buffers(&mut self) {
        self.company_name = self.cfg.branding.company_name.clone();
        self.company_logo_url = self.cfg.branding.company_logo_url.clone();
    }
}
