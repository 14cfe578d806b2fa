//! One user-initiated "generate report" action: submit, poll, retry.
//!
//! ```text
//! idle -> submitting(1) -> polling -> completed
//!              |              |
//!              +--> retrying(n) <--+   (until max_retries, then failed-final)
//! ```
//!
//! A job the server reports as failed counts as a failed attempt, the same as
//! a rejected submission. Running out of status checks is a separate error
//! and is not retried.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{self, MissedTickBehavior},
};

use crate::{
    api::{ApiError, AppraisalApi, GenerateRequest, report_tags},
    config::{Branding, GenerationCfg},
    jobs::{JobStatus, Property, ReportJob},
    registry::SharedRegistry,
    tracker::Tracker,
};

/// Where the flow currently is.
#[derive(Clone, Debug, PartialEq)]
pub enum FlowState {
    Submitting { attempt: u32 },
    Polling { attempt: u32, job_id: String, progress: u8 },
    Retrying { attempt: u32 },
    Completed { pdf_url: Option<String> },
    FailedFinal { message: String },
    TimedOut { message: String },
}

/// Progress notification for the UI.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowUpdate {
    pub property_id: String,
    pub state: FlowState,
    /// Status line shown to the user.
    pub text: String,
}

/// One failed attempt.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AttemptError {
    pub message: String,
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
}

/// Terminal errors of a flow.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum FlowError {
    #[error("Report generation failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
    #[error("Report generation is taking too long ({polls} status checks without a result)")]
    TimedOut { polls: u32 },
}

/// Result of a finished flow: the UI should go back to this property.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowOutcome {
    pub property_id: String,
    pub job_id: String,
    pub pdf_url: Option<String>,
}

/// How a single attempt ended, short of a retryable failure.
enum AttemptEnd {
    Completed(ReportJob),
    TimedOut(u32),
}

/// Runs the generate/poll/retry state machine for one property at a time.
pub struct ReportGenerator {
    api: Arc<dyn AppraisalApi>,
    registry: SharedRegistry<ReportJob>,
    cfg: GenerationCfg,
    branding: Branding,
    updates: mpsc::Sender<FlowUpdate>,
    /// Background tracker that also watches accepted jobs.
    tracker: Option<Tracker>,
    /// Address looked up on the first attempt and reused by retries.
    address: Option<Property>,
    history: Vec<AttemptError>,
}

impl ReportGenerator {
    pub fn new(
        api: Arc<dyn AppraisalApi>,
        registry: SharedRegistry<ReportJob>,
        cfg: GenerationCfg,
        branding: Branding,
        updates: mpsc::Sender<FlowUpdate>,
    ) -> Self {
        Self {
            api,
            registry,
            cfg,
            branding,
            updates,
            tracker: None,
            address: None,
            history: Vec::new(),
        }
    }

    /// Register accepted jobs with `tracker` so they stay visible and survive
    /// a client-side timeout. The tracker does not poll them while this flow
    /// does.
    pub fn with_tracker(mut self, tracker: Tracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Failed attempts of the current (or last) run.
    pub fn history(&self) -> &[AttemptError] {
        &self.history
    }

    /// Generate a report for `property_id`, retrying up to the configured bound.
    pub async fn run(&mut self, property_id: &str) -> Result<FlowOutcome, FlowError> {
        // A fresh action starts with a clean slate.
        self.history.clear();
        self.address = None;
        let max = self.cfg.max_retries.max(1);
        let mut attempt = 1;

        loop {
            self.set_state(
                property_id,
                FlowState::Submitting { attempt },
                if attempt == 1 {
                    "Starting report generation...".to_string()
                } else {
                    format!("Retrying report generation (attempt {attempt}/{max})...")
                },
            )
            .await;

            let failure = match self.attempt(property_id, attempt).await {
                Ok(AttemptEnd::Completed(job)) => return Ok(self.complete(job).await),
                Ok(AttemptEnd::TimedOut(polls)) => {
                    let err = FlowError::TimedOut { polls };
                    tracing::warn!("report flow for {property_id} timed out");
                    self.set_state(
                        property_id,
                        FlowState::TimedOut {
                            message: err.to_string(),
                        },
                        err.to_string(),
                    )
                    .await;
                    return Err(err);
                }
                Err(message) => message,
            };

            tracing::warn!("report attempt {attempt} for {property_id} failed: {failure}");
            self.history.push(AttemptError {
                message: failure.clone(),
                attempt_number: attempt,
                timestamp: Utc::now(),
            });

            if attempt >= max {
                let err = FlowError::Exhausted {
                    attempts: attempt,
                    last_error: failure,
                };
                tracing::error!("report flow for {property_id} gave up: {err}");
                self.set_state(
                    property_id,
                    FlowState::FailedFinal {
                        message: err.to_string(),
                    },
                    err.to_string(),
                )
                .await;
                return Err(err);
            }

            self.set_state(
                property_id,
                FlowState::Retrying {
                    attempt: attempt + 1,
                },
                format!("Attempt {attempt} failed: {failure}. Retrying..."),
            )
            .await;
            time::sleep(self.cfg.retry_delay()).await;
            attempt += 1;
        }
    }

    /// Submit once and poll the accepted job. `Err` is a retryable failure.
    async fn attempt(&mut self, property_id: &str, attempt: u32) -> Result<AttemptEnd, String> {
        let address = match self.address.clone() {
            Some(address) => address,
            None => {
                let address = self
                    .api
                    .property(property_id)
                    .await
                    .map_err(|e| format!("could not load property address: {e}"))?;
                self.address = Some(address.clone());
                address
            }
        };

        let req = GenerateRequest {
            address_line: address.address_line,
            suburb: address.suburb,
            state: address.state,
            postcode: address.postcode,
            property_id: property_id.to_string(),
            attempt_number: attempt,
            company_name: self.branding.company_name(),
            company_logo_url: self.branding.company_logo_url(),
        };
        let accepted = self
            .api
            .generate_report(&req)
            .await
            .map_err(|e| e.to_string())?;
        tracing::info!(
            "report job {} accepted for {property_id} (attempt {attempt})",
            accepted.job_id
        );

        let job = ReportJob::new(accepted.job_id, property_id.to_string(), accepted.status_url);
        let saved = match &self.tracker {
            Some(tracker) => tracker.track_claimed(job.clone()).await,
            None => self.registry.lock().await.add_job(job.clone()).await,
        };
        if let Err(e) = saved {
            tracing::warn!("failed to persist job {}: {e}", job.job_id);
        }
        self.poll(job, attempt).await
    }

    /// Poll one job until it is terminal or the poll budget runs out.
    async fn poll(&mut self, job: ReportJob, attempt: u32) -> Result<AttemptEnd, String> {
        let mut ticker = time::interval(self.cfg.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut current = job;
        for _ in 0..self.cfg.max_polls {
            ticker.tick().await;
            let resp = match self.api.job_status(&current.status_url).await {
                Ok(resp) => resp,
                Err(ApiError::NotFound) => {
                    self.forget(&current.job_id).await;
                    return Err(format!("report job {} no longer exists", current.job_id));
                }
                Err(e) => {
                    tracing::warn!("status check for job {} failed: {e}", current.job_id);
                    continue;
                }
            };

            current.apply(&resp);
            if let Err(e) = self
                .registry
                .lock()
                .await
                .update(&current.job_id, |j| j.apply(&resp))
                .await
            {
                tracing::warn!("failed to persist job {}: {e}", current.job_id);
            }

            match current.status {
                JobStatus::Completed => {
                    if let Some(appraisal_id) = &resp.appraisal_id {
                        tracing::info!("appraisal {appraisal_id} saved for {}", current.property_id);
                    }
                    return Ok(AttemptEnd::Completed(current));
                }
                JobStatus::Failed => {
                    self.forget(&current.job_id).await;
                    return Err(resp.failure_reason());
                }
                JobStatus::Pending | JobStatus::Processing => {
                    let text = match (&current.message, &current.stage) {
                        (Some(m), _) => format!("{m} ({}%)", current.progress),
                        (None, Some(stage)) => format!("{stage} ({}%)", current.progress),
                        (None, None) => format!("Generating report ({}%)", current.progress),
                    };
                    self.set_state(
                        &current.property_id,
                        FlowState::Polling {
                            attempt,
                            job_id: current.job_id.clone(),
                            progress: current.progress,
                        },
                        text,
                    )
                    .await;
                }
            }
        }

        if let Some(tracker) = &self.tracker {
            tracing::info!("job {} left to the background tracker", current.job_id);
            tracker.release(&current.job_id);
        } else {
            self.forget(&current.job_id).await;
        }
        Ok(AttemptEnd::TimedOut(self.cfg.max_polls))
    }

    async fn complete(&mut self, job: ReportJob) -> FlowOutcome {
        tracing::info!("report ready for {} (job {})", job.property_id, job.job_id);
        if let Err(e) = self.api.revalidate(&report_tags(&job.property_id)).await {
            tracing::warn!("cache revalidation failed: {e}");
        }
        self.forget(&job.job_id).await;
        self.set_state(
            &job.property_id,
            FlowState::Completed {
                pdf_url: job.pdf_url.clone(),
            },
            "Report generated".to_string(),
        )
        .await;
        FlowOutcome {
            property_id: job.property_id,
            job_id: job.job_id,
            pdf_url: job.pdf_url,
        }
    }

    async fn forget(&self, job_id: &str) {
        if let Some(tracker) = &self.tracker {
            tracker.untrack(job_id).await;
        } else if let Err(e) = self.registry.lock().await.remove_job(job_id).await {
            tracing::warn!("failed to persist removal of {job_id}: {e}");
        }
    }

    async fn set_state(&self, property_id: &str, state: FlowState, text: String) {
        let _ = self
            .updates
            .send(FlowUpdate {
                property_id: property_id.to_string(),
                state,
                text,
            })
            .await;
    }
}
