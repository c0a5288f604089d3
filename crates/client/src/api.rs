// crates/client/src/api.rs
//! HTTP pull endpoints of the analysis server.
//!
//! [`AnalysisApi`] is the seam the poller and the session view depend on;
//! [`HttpAnalysisApi`] is the reqwest-backed implementation. Every response
//! body is converted into typed values here, so callers never handle JSON.

use async_trait::async_trait;
use nanocas_view_core::ViewError;
use nanocas_view_types::{
    parse_analysis_info, parse_coverage_payload, parse_location_check, CoverageSnapshot,
    LocationCheck, PayloadError, Session, UidResponse,
};
use reqwest::multipart::Form;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const COVERAGE_ENDPOINT: &str = "get_coverage";
pub const ANALYSIS_INFO_ENDPOINT: &str = "get_analysis_info";
pub const DATABASE_STATUS_ENDPOINT: &str = "check_database_status";
pub const INDEX_DEVICES_ENDPOINT: &str = "index_devices";
pub const UID_ENDPOINT: &str = "get_uid";
pub const VALIDATE_LOCATIONS_ENDPOINT: &str = "validate_locations";

#[derive(Debug, Error)]
pub enum ApiError {
    /// No HTTP response at all: refused, reset, timed out.
    #[error("Request to {endpoint} failed: {message}")]
    Transport {
        endpoint: &'static str,
        message: String,
    },

    #[error("{endpoint} returned HTTP {status}")]
    Http {
        endpoint: &'static str,
        status: u16,
        /// `error` or `message` field of the body, when it had one.
        message: Option<String>,
    },

    #[error("{endpoint}: {source}")]
    Payload {
        endpoint: &'static str,
        #[source]
        source: PayloadError,
    },
}

impl ApiError {
    pub fn transport(endpoint: &'static str, err: reqwest::Error) -> Self {
        Self::Transport {
            endpoint,
            message: err.to_string(),
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Transport { endpoint, .. }
            | Self::Http { endpoint, .. }
            | Self::Payload { endpoint, .. } => endpoint,
        }
    }

    /// User-facing form: connectivity, the server's own words, or generic.
    pub fn to_view_error(&self) -> ViewError {
        match self {
            Self::Transport { .. } => ViewError::Connectivity,
            Self::Http {
                message: Some(message),
                ..
            } => ViewError::Server(message.clone()),
            Self::Http { message: None, .. } => ViewError::Unexpected,
            Self::Payload { source, .. } => match source.server_message() {
                Some(message) => ViewError::Server(message.to_owned()),
                None => ViewError::Unexpected,
            },
        }
    }
}

/// The three per-session pulls of a poll cycle.
#[async_trait]
pub trait AnalysisApi: Send + Sync {
    async fn coverage(&self, project_id: &str) -> Result<CoverageSnapshot, ApiError>;

    async fn analysis_info(&self, project_id: &str) -> Result<Session, ApiError>;

    /// Whether the backing store for `project_id` has been built.
    async fn database_status(&self, project_id: &str) -> Result<bool, ApiError>;
}

#[derive(Deserialize)]
struct DatabaseStatus {
    is_ready: bool,
}

#[derive(Clone)]
pub struct HttpAnalysisApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAnalysisApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn get_json(
        &self,
        endpoint: &'static str,
        query: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        let response = self
            .client
            .get(self.url(endpoint))
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::transport(endpoint, e))?;
        read_json(endpoint, response).await
    }

    async fn post_form(&self, endpoint: &'static str, form: Form) -> Result<Value, ApiError> {
        let response = self
            .client
            .post(self.url(endpoint))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::transport(endpoint, e))?;
        read_json(endpoint, response).await
    }

    /// Names of the sequencing devices the server can see.
    pub async fn index_devices(&self) -> Result<Vec<String>, ApiError> {
        let body = self.get_json(INDEX_DEVICES_ENDPOINT, &[]).await?;
        serde_json::from_value(body).map_err(|e| ApiError::Payload {
            endpoint: INDEX_DEVICES_ENDPOINT,
            source: PayloadError::malformed("device list", e),
        })
    }

    /// Session identifier for an output directory; reused if one exists.
    pub async fn get_uid(&self, source_path: &str) -> Result<String, ApiError> {
        let form = Form::new().text("minION", source_path.to_owned());
        let body = self.post_form(UID_ENDPOINT, form).await?;
        let response: UidResponse = serde_json::from_value(body).map_err(|e| ApiError::Payload {
            endpoint: UID_ENDPOINT,
            source: PayloadError::malformed("uid", e),
        })?;
        Ok(response.uid)
    }

    pub async fn validate_locations(
        &self,
        source_path: &str,
        queries: Option<&str>,
    ) -> Result<LocationCheck, ApiError> {
        let mut form = Form::new().text("minION", source_path.to_owned());
        if let Some(queries) = queries {
            form = form.text("Queries", queries.to_owned());
        }
        let body = self.post_form(VALIDATE_LOCATIONS_ENDPOINT, form).await?;
        parse_location_check(body).map_err(|source| ApiError::Payload {
            endpoint: VALIDATE_LOCATIONS_ENDPOINT,
            source,
        })
    }
}

#[async_trait]
impl AnalysisApi for HttpAnalysisApi {
    async fn coverage(&self, project_id: &str) -> Result<CoverageSnapshot, ApiError> {
        let body = self
            .get_json(COVERAGE_ENDPOINT, &[("projectId", project_id)])
            .await?;
        let snapshot = parse_coverage_payload(body).map_err(|source| ApiError::Payload {
            endpoint: COVERAGE_ENDPOINT,
            source,
        })?;
        if snapshot.skipped > 0 {
            tracing::warn!(
                project_id,
                skipped = snapshot.skipped,
                kept = snapshot.records.len(),
                "coverage poll dropped malformed records"
            );
        }
        Ok(snapshot)
    }

    async fn analysis_info(&self, project_id: &str) -> Result<Session, ApiError> {
        let body = self
            .get_json(ANALYSIS_INFO_ENDPOINT, &[("uid", project_id)])
            .await?;
        parse_analysis_info(body).map_err(|source| ApiError::Payload {
            endpoint: ANALYSIS_INFO_ENDPOINT,
            source,
        })
    }

    async fn database_status(&self, project_id: &str) -> Result<bool, ApiError> {
        let body = self
            .get_json(DATABASE_STATUS_ENDPOINT, &[("projectId", project_id)])
            .await?;
        let status: DatabaseStatus = serde_json::from_value(body).map_err(|e| ApiError::Payload {
            endpoint: DATABASE_STATUS_ENDPOINT,
            source: PayloadError::malformed("database status", e),
        })?;
        Ok(status.is_ready)
    }
}

/// Decode a response body as JSON regardless of its content type; the
/// server sends some JSON bodies as `text/html`.
async fn read_json(endpoint: &'static str, response: reqwest::Response) -> Result<Value, ApiError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ApiError::transport(endpoint, e))?;

    if !status.is_success() {
        return Err(ApiError::Http {
            endpoint,
            status: status.as_u16(),
            message: structured_message(&text),
        });
    }

    serde_json::from_str(&text).map_err(|e| ApiError::Payload {
        endpoint,
        source: PayloadError::malformed("response", e),
    })
}

fn structured_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error", "message"]
        .iter()
        .find_map(|key| value.get(key)?.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_owned)
}
