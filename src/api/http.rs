//! HTTP implementation of [`AppraisalApi`].

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;

use super::{AppraisalApi, ApiError, GenerateAccepted, GenerateRequest, JobStatusResponse};
use crate::{config::ApiCfg, jobs::Property};

/// Error body shape used by every endpoint.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Generation response; `jobId` is checked rather than trusted.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody {
    job_id: Option<String>,
    status_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePropertyReq<'a> {
    address_common_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatePropertyResp {
    id: String,
}

#[derive(Debug, Serialize)]
struct RevalidateReq<'a> {
    tags: &'a [String],
}

/// Talks to the backend with a bearer token on every request.
pub struct HttpApi {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpApi {
    pub fn new(cfg: &ApiCfg) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| ApiError::Transport(format!("failed to build http client: {e}")))?;
        let token = (!cfg.token.is_empty()).then(|| cfg.token.clone());
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Absolute URL for a path or an already absolute status URL.
    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Default status location for a job id.
    pub fn status_path(job_id: &str) -> String {
        format!("/api/reports/status/{}", urlencoding::encode(job_id))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ApiError> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        check_status(resp).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self.send(self.http.get(self.url(path))).await?;
        decode(resp).await
    }
}

/// Map non-2xx responses to typed errors, keeping the server's reason.
async fn check_status(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound);
    }
    let text = resp.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let message = body
        .error
        .or(body.message)
        .unwrap_or_else(|| if text.is_empty() { status.to_string() } else { text });
    Err(ApiError::Status {
        code: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    resp.json::<T>()
        .await
        .map_err(|e| ApiError::Decode(e.to_string()))
}

#[async_trait]
impl AppraisalApi for HttpApi {
    async fn list_properties(&self) -> Result<Vec<Property>, ApiError> {
        self.get_json("/api/properties").await
    }

    async fn property(&self, property_id: &str) -> Result<Property, ApiError> {
        let path = format!("/api/properties/{}", urlencoding::encode(property_id));
        self.get_json(&path).await
    }

    async fn create_property(&self, address_common_name: &str) -> Result<String, ApiError> {
        let req = self
            .http
            .post(self.url("/api/properties"))
            .json(&CreatePropertyReq {
                address_common_name,
            });
        let created: CreatePropertyResp = decode(self.send(req).await?).await?;
        Ok(created.id)
    }

    async fn generate_report(&self, body: &GenerateRequest) -> Result<GenerateAccepted, ApiError> {
        let req = self
            .http
            .post(self.url("/api/reports/generate"))
            .json(body);
        let resp: GenerateBody = decode(self.send(req).await?).await?;
        let job_id = resp
            .job_id
            .filter(|id| !id.is_empty())
            .ok_or(ApiError::MissingJobId)?;
        let status_url = resp
            .status_url
            .unwrap_or_else(|| Self::status_path(&job_id));
        Ok(GenerateAccepted { job_id, status_url })
    }

    async fn job_status(&self, status_url: &str) -> Result<JobStatusResponse, ApiError> {
        let resp = self
            .send(self.http.get(self.url(status_url)).header("cache-control", "no-store"))
            .await?;
        decode(resp).await
    }

    async fn revalidate(&self, tags: &[String]) -> Result<(), ApiError> {
        let req = self
            .http
            .post(self.url("/api/revalidate"))
            .json(&RevalidateReq { tags });
        self.send(req).await?;
        Ok(())
    }
}
