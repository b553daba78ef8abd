//! Remote HTTP collaborator.
//!
//! [`RemoteApi`] is the seam the store pushes records through; tests supply a
//! double, the application wires [`HttpRemoteApi`]. Failures come back as
//! [`TransportError`] and are never fatal to a write: the store demotes the
//! write to the offline path instead.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::records::{NewAcademicRecord, NewAssessment, NewStudent};

/// A failed remote request: transport fault, timeout, or non-2xx rejection.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
    /// HTTP status when the server answered; `None` for transport faults.
    pub status: Option<u16>,
}

impl TransportError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "remote rejected request ({}): {}", status, self.message),
            None => write!(f, "remote unreachable: {}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => TransportError::rejected(status.as_u16(), err.to_string()),
            None => TransportError::transport(err.to_string()),
        }
    }
}

/// The create endpoints the store needs. Each returns the server-assigned id.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create_student(&self, student: &NewStudent) -> Result<i64, TransportError>;

    async fn create_academic_record(
        &self,
        student_id: i64,
        record: &NewAcademicRecord,
    ) -> Result<i64, TransportError>;

    async fn create_assessment(
        &self,
        student_id: i64,
        assessment: &NewAssessment,
    ) -> Result<i64, TransportError>;
}

/// Connection settings for [`HttpRemoteApi`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub base_url: String,
    /// Bearer token attached to every request, when the session has one.
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Whole-request deadline. A hung connection counts as offline for
    /// fallback purposes.
    #[serde(default = "RemoteConfig::default_timeout", with = "duration_secs")]
    pub timeout: Duration,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bearer_token: None,
            timeout: Self::default_timeout(),
        }
    }

    fn default_timeout() -> Duration {
        Duration::from_secs(10)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: i64,
}

/// JSON-over-HTTPS implementation against the student API.
pub struct HttpRemoteApi {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl HttpRemoteApi {
    pub fn new(config: RemoteConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .cookie_store(true)
            .build()
            .map_err(|err| TransportError::transport(format!("client setup failed: {err}")))?;
        Ok(Self { client, config })
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<i64, TransportError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::rejected(status.as_u16(), body));
        }
        let created: CreatedResponse = response.json().await?;
        Ok(created.id)
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn create_student(&self, student: &NewStudent) -> Result<i64, TransportError> {
        self.post_json("students", student).await
    }

    async fn create_academic_record(
        &self,
        student_id: i64,
        record: &NewAcademicRecord,
    ) -> Result<i64, TransportError> {
        self.post_json(&format!("students/{student_id}/academic-records"), record)
            .await
    }

    async fn create_assessment(
        &self,
        student_id: i64,
        assessment: &NewAssessment,
    ) -> Result<i64, TransportError> {
        self.post_json(&format!("students/{student_id}/assessments"), assessment)
            .await
    }
}
