//! Client side of the property backend: properties, report jobs, cache tags.

/// reqwest-backed implementation.
pub mod http;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::jobs::{Property, ServerStatus};

pub use http::HttpApi;

/// Cache tag covering property lists and detail reads.
pub const PROPERTIES_TAG: &str = "properties";
/// Cache tag covering appraisal reports.
pub const APPRAISALS_TAG: &str = "appraisals";

/// Errors callers need to tell apart; a 404 means something different from
/// a flaky network.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("server returned {code}: {message}")]
    Status { code: u16, message: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("server accepted the request but returned no job id")]
    MissingJobId,
}

/// Body of the report generation request.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub address_line: String,
    pub suburb: String,
    pub state: String,
    pub postcode: String,
    pub property_id: String,
    pub attempt_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_logo_url: Option<String>,
}

/// A generation request the job service accepted.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerateAccepted {
    pub job_id: String,
    /// Where to poll; absolute or relative to the API base.
    pub status_url: String,
}

/// Body returned by the job status endpoint.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub status: ServerStatus,
    #[serde(default)]
    pub progress: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub appraisal_id: Option<String>,
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(default)]
    pub pdf_url: Option<String>,
}

impl Default for JobStatusResponse {
    fn default() -> Self {
        Self {
            status: ServerStatus::Queued,
            progress: None,
            message: None,
            error: None,
            appraisal_id: None,
            property_id: None,
            pdf_url: None,
        }
    }
}

impl JobStatusResponse {
    /// Reason shown for a failed job.
    pub fn failure_reason(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "Report generation failed".to_string())
    }
}

/// Everything the tracker, flows and worker need from the backend.
#[async_trait]
pub trait AppraisalApi: Send + Sync {
    async fn list_properties(&self) -> Result<Vec<Property>, ApiError>;

    async fn property(&self, property_id: &str) -> Result<Property, ApiError>;

    /// Create a property and return its id.
    async fn create_property(&self, address_common_name: &str) -> Result<String, ApiError>;

    async fn generate_report(&self, req: &GenerateRequest) -> Result<GenerateAccepted, ApiError>;

    async fn job_status(&self, status_url: &str) -> Result<JobStatusResponse, ApiError>;

    /// Invalidate cached reads tagged with any of `tags`.
    async fn revalidate(&self, tags: &[String]) -> Result<(), ApiError>;
}

/// Tags to invalidate once a report for `property_id` exists.
pub fn report_tags(property_id: &str) -> Vec<String> {
    vec![
        PROPERTIES_TAG.to_string(),
        format!("property:{property_id}"),
        APPRAISALS_TAG.to_string(),
    ]
}
