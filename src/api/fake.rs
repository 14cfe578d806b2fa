//! Scripted in-memory backend for tests.

use async_trait::async_trait;
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::Notify;

use super::{AppraisalApi, ApiError, GenerateAccepted, GenerateRequest, JobStatusResponse};
use crate::jobs::{Property, ServerStatus};

/// Replays queued responses. The last queued status response is repeated
/// once the queue is down to one entry.
#[derive(Default)]
pub struct ScriptedApi {
    pub properties: Mutex<Vec<Property>>,
    pub generate: Mutex<VecDeque<Result<GenerateAccepted, ApiError>>>,
    pub statuses: Mutex<VecDeque<Result<JobStatusResponse, ApiError>>>,
    pub created_ids: Mutex<VecDeque<Result<String, ApiError>>>,
    pub generate_requests: Mutex<Vec<GenerateRequest>>,
    pub revalidated: Mutex<Vec<Vec<String>>>,
    pub property_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    /// When set, status calls wait for a notification before answering.
    pub status_gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedApi {
    pub fn with_property(id: &str) -> Self {
        let api = Self::default();
        api.properties.lock().unwrap().push(Property {
            id: id.into(),
            address_common_name: "12 Ocean St, Bondi NSW 2026".into(),
            address_line: "12 Ocean St".into(),
            suburb: "Bondi".into(),
            state: "NSW".into(),
            postcode: "2026".into(),
            optimistic: false,
        });
        api
    }

    pub fn push_accepted(&self, job_id: &str) {
        self.generate.lock().unwrap().push_back(Ok(GenerateAccepted {
            job_id: job_id.into(),
            status_url: format!("/api/reports/status/{job_id}"),
        }));
    }

    pub fn push_generate_error(&self, err: ApiError) {
        self.generate.lock().unwrap().push_back(Err(err));
    }

    pub fn push_status(&self, status: ServerStatus) {
        self.statuses.lock().unwrap().push_back(Ok(JobStatusResponse {
            status,
            ..JobStatusResponse::default()
        }));
    }

    pub fn push_status_response(&self, resp: Result<JobStatusResponse, ApiError>) {
        self.statuses.lock().unwrap().push_back(resp);
    }

    /// Hold every status call until the returned handle is notified.
    pub fn gate_statuses(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.status_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AppraisalApi for ScriptedApi {
    async fn list_properties(&self) -> Result<Vec<Property>, ApiError> {
        Ok(self.properties.lock().unwrap().clone())
    }

    async fn property(&self, property_id: &str) -> Result<Property, ApiError> {
        self.property_calls.fetch_add(1, Ordering::SeqCst);
        self.properties
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == property_id)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn create_property(&self, _address_common_name: &str) -> Result<String, ApiError> {
        self.created_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Transport("no scripted property".into())))
    }

    async fn generate_report(&self, req: &GenerateRequest) -> Result<GenerateAccepted, ApiError> {
        self.generate_requests.lock().unwrap().push(req.clone());
        self.generate
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Transport("no scripted generation".into())))
    }

    async fn job_status(&self, _status_url: &str) -> Result<JobStatusResponse, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.status_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            statuses.pop_front().unwrap_or(Err(ApiError::NotFound))
        } else {
            statuses
                .front()
                .cloned()
                .unwrap_or_else(|| Err(ApiError::Transport("no scripted status".into())))
        }
    }

    async fn revalidate(&self, tags: &[String]) -> Result<(), ApiError> {
        self.revalidated.lock().unwrap().push(tags.to_vec());
        Ok(())
    }
}
