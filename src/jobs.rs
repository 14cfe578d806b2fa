//! Report jobs, pending property creations and the property rows they decorate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{api::JobStatusResponse, merge::Keyed};

/// Client-side job status, coarser than what the job service reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted by the server but not started.
    Pending,
    /// The server is collecting data or rendering the PDF.
    Processing,
    /// Finished; the report exists.
    Completed,
    /// Finished without a report.
    Failed,
}

impl JobStatus {
    /// `completed` and `failed` never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Short label for tables.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }
}

/// Status values reported by the job service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Queued,
    FetchingData,
    DataCollected,
    GeneratingPdf,
    Completed,
    Failed,
    /// Anything newer than this client knows about.
    #[serde(other)]
    Unknown,
}

impl ServerStatus {
    /// Collapse a server sub-state into the client status.
    pub fn client_status(self) -> JobStatus {
        match self {
            Self::Queued => JobStatus::Pending,
            Self::FetchingData | Self::DataCollected | Self::GeneratingPdf | Self::Unknown => {
                JobStatus::Processing
            }
            Self::Completed => JobStatus::Completed,
            Self::Failed => JobStatus::Failed,
        }
    }

    /// Wire name, kept on the job so the UI can show the finer stage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::FetchingData => "fetching_data",
            Self::DataCollected => "data_collected",
            Self::GeneratingPdf => "generating_pdf",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

/// Shape shared by everything the registry can track.
pub trait TrackedJob: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Id issued for the job itself.
    fn job_id(&self) -> &str;
    /// Entity the job works on; only one job per target is kept.
    fn target_id(&self) -> &str;
    fn status(&self) -> JobStatus;
    fn started_at(&self) -> DateTime<Utc>;
}

/// One report-generation job the client is watching.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportJob {
    pub job_id: String,
    pub property_id: String,
    pub status_url: String,
    pub status: JobStatus,
    /// 0..=100; the last value seen from the server wins.
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Raw server sub-state, e.g. `generating_pdf`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl ReportJob {
    /// A freshly accepted job, not yet polled.
    pub fn new(job_id: String, property_id: String, status_url: String) -> Self {
        Self {
            job_id,
            property_id,
            status_url,
            status: JobStatus::Pending,
            progress: 0,
            message: None,
            error: None,
            stage: None,
            pdf_url: None,
            started_at: Utc::now(),
        }
    }

    /// Fold one status response into the job.
    pub fn apply(&mut self, resp: &JobStatusResponse) {
        self.stage = Some(resp.status.as_str().to_string());
        self.status = resp.status.client_status();
        match resp.status {
            ServerStatus::Completed => {
                self.progress = 100;
                if let Some(m) = &resp.message {
                    self.message = Some(m.clone());
                }
                if let Some(url) = &resp.pdf_url {
                    self.pdf_url = Some(url.clone());
                }
            }
            ServerStatus::Failed => {
                self.error = Some(resp.failure_reason());
            }
            _ => {
                if let Some(p) = resp.progress {
                    self.progress = p.min(100) as u8;
                }
                if let Some(m) = &resp.message {
                    self.message = Some(m.clone());
                }
            }
        }
    }
}

impl TrackedJob for ReportJob {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn target_id(&self) -> &str {
        &self.property_id
    }

    fn status(&self) -> JobStatus {
        self.status
    }

    fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// A property creation that has been requested but not seen in a server list yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingJob {
    /// Generated locally; the server never sees it.
    pub job_id: String,
    pub address_common_name: String,
    pub status: JobStatus,
    /// Filled in once the server has created the property.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl PendingJob {
    pub fn new(address_common_name: String) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            address_common_name,
            status: JobStatus::Processing,
            property_id: None,
            started_at: Utc::now(),
        }
    }

    /// The row shown in the property list until the server catches up.
    pub fn optimistic_property(&self) -> Property {
        Property {
            id: self
                .property_id
                .clone()
                .unwrap_or_else(|| self.job_id.clone()),
            address_common_name: self.address_common_name.clone(),
            optimistic: true,
            ..Property::default()
        }
    }
}

impl TrackedJob for PendingJob {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    // Property creations have no other target; each request is its own entity.
    fn target_id(&self) -> &str {
        &self.job_id
    }

    fn status(&self) -> JobStatus {
        self.status
    }

    fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Property row as returned by the properties endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: String,
    #[serde(default)]
    pub address_common_name: String,
    #[serde(default)]
    pub address_line: String,
    #[serde(default)]
    pub suburb: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub postcode: String,
    /// Local-only marker for rows synthesized from a pending creation.
    #[serde(skip)]
    pub optimistic: bool,
}

impl Keyed for Property {
    fn key(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(status: ServerStatus) -> JobStatusResponse {
        JobStatusResponse {
            status,
            ..JobStatusResponse::default()
        }
    }

    #[test]
    fn server_sub_states_collapse_to_client_status() {
        assert_eq!(ServerStatus::Queued.client_status(), JobStatus::Pending);
        assert_eq!(ServerStatus::FetchingData.client_status(), JobStatus::Processing);
        assert_eq!(ServerStatus::DataCollected.client_status(), JobStatus::Processing);
        assert_eq!(ServerStatus::GeneratingPdf.client_status(), JobStatus::Processing);
        assert_eq!(ServerStatus::Completed.client_status(), JobStatus::Completed);
        assert_eq!(ServerStatus::Failed.client_status(), JobStatus::Failed);
    }

    #[test]
    fn unknown_server_status_deserializes() {
        let s: ServerStatus = serde_json::from_str("\"rendering_charts\"").unwrap();
        assert_eq!(s, ServerStatus::Unknown);
        assert_eq!(s.client_status(), JobStatus::Processing);
    }

    #[test]
    fn apply_keeps_stage_and_progress() {
        let mut job = ReportJob::new("j1".into(), "p1".into(), "/s/j1".into());
        let mut r = resp(ServerStatus::GeneratingPdf);
        r.progress = Some(70);
        r.message = Some("Rendering".into());
        job.apply(&r);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.stage.as_deref(), Some("generating_pdf"));
        assert_eq!(job.progress, 70);
        assert_eq!(job.message.as_deref(), Some("Rendering"));
    }

    #[test]
    fn apply_completed_forces_full_progress() {
        let mut job = ReportJob::new("j1".into(), "p1".into(), "/s/j1".into());
        let mut r = resp(ServerStatus::Completed);
        r.pdf_url = Some("https://cdn/report.pdf".into());
        job.apply(&r);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.pdf_url.as_deref(), Some("https://cdn/report.pdf"));
    }

    #[test]
    fn apply_failed_prefers_error_over_message() {
        let mut job = ReportJob::new("j1".into(), "p1".into(), "/s/j1".into());
        let mut r = resp(ServerStatus::Failed);
        r.message = Some("Job failed".into());
        r.error = Some("No comparable rentals".into());
        job.apply(&r);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("No comparable rentals"));
    }

    #[test]
    fn report_job_persists_in_camel_case() {
        let job = ReportJob::new("j1".into(), "p1".into(), "/s/j1".into());
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"jobId\":\"j1\""));
        assert!(json.contains("\"propertyId\":\"p1\""));
        assert!(json.contains("\"status\":\"pending\""));
        assert!(!json.contains("pdfUrl"));
    }

    #[test]
    fn optimistic_property_uses_server_id_once_known() {
        let mut pending = PendingJob::new("12 Ocean St, Bondi".into());
        assert_eq!(pending.optimistic_property().id, pending.job_id);
        pending.property_id = Some("prop-9".into());
        let row = pending.optimistic_property();
        assert_eq!(row.id, "prop-9");
        assert!(row.optimistic);
        assert_eq!(row.address_common_name, "12 Ocean St, Bondi");
    }
}
