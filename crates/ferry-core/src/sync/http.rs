//! Dispatcher that replays tasks as JSON posts against an HTTP backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::models::{SyncTask, TaskKind};
use crate::util::{compact_text, is_http_url, normalize_text_option};

use super::dispatcher::{DispatchError, TaskDispatcher};

const HTTP_TIMEOUT_SECS: u64 = 20;

/// Posts each payload to `{base_url}/{kind}`, e.g. `/create-entity`.
///
/// Conflict detection is off unless an entity path is configured with
/// [`HttpDispatcher::with_entity_path`]; without it every task is sent as is.
#[derive(Clone)]
pub struct HttpDispatcher {
    base_url: String,
    client: reqwest::Client,
    bearer_token: Option<String>,
    entity_path: Option<String>,
}

impl std::fmt::Debug for HttpDispatcher {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpDispatcher")
            .field("base_url", &self.base_url)
            .field("entity_path", &self.entity_path)
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl HttpDispatcher {
    pub fn new(base_url: impl Into<String>) -> crate::Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|error| crate::Error::Config(format!("HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            client,
            bearer_token: None,
            entity_path: None,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = normalize_text_option(Some(token.into()));
        self
    }

    /// Look up `GET {base_url}/{path}/{entity id}` before update-style tasks.
    ///
    /// The response's `updatedAt` (Unix ms or RFC 3339) is compared with the
    /// task's creation time; a missing entity (404) never conflicts.
    #[must_use]
    pub fn with_entity_path(mut self, path: impl Into<String>) -> Self {
        self.entity_path = normalize_text_option(Some(path.into()))
            .map(|path| path.trim_matches('/').to_string())
            .filter(|path| !path.is_empty());
        self
    }

    pub fn endpoint(&self, kind: TaskKind) -> String {
        format!("{}/{}", self.base_url, kind.as_str())
    }

    /// URL of the server copy of `entity_id`, when lookups are enabled
    pub fn entity_url(&self, entity_id: &str) -> Option<reqwest::Url> {
        let path = self.entity_path.as_deref()?;
        let mut url = reqwest::Url::parse(&self.base_url).ok()?;
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(path.split('/'))
            .push(entity_id);
        Some(url)
    }

    async fn fetch_updated_at(&self, url: reqwest::Url) -> Result<Option<i64>, DispatchError> {
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|error| DispatchError::transient(format!("entity lookup failed: {error}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }
        Ok(serde_json::from_str::<Value>(&body)
            .ok()
            .as_ref()
            .and_then(parse_updated_at))
    }

    async fn post(&self, kind: TaskKind, payload: &Value) -> Result<(), DispatchError> {
        let mut request = self
            .client
            .post(self.endpoint(kind))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(payload);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|error| DispatchError::transient(format!("{kind} request failed: {error}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }
}

#[async_trait]
impl TaskDispatcher for HttpDispatcher {
    async fn create_entity(&self, payload: &Value) -> Result<(), DispatchError> {
        self.post(TaskKind::CreateEntity, payload).await
    }

    async fn update_entity(&self, payload: &Value) -> Result<(), DispatchError> {
        self.post(TaskKind::UpdateEntity, payload).await
    }

    async fn upsert_related_record(&self, payload: &Value) -> Result<(), DispatchError> {
        self.post(TaskKind::UpsertRelatedRecord, payload).await
    }

    async fn remote_updated_at(&self, task: &SyncTask) -> Result<Option<i64>, DispatchError> {
        let Some(url) = task.entity_id().and_then(|id| self.entity_url(id)) else {
            return Ok(None);
        };
        self.fetch_updated_at(url).await
    }
}

/// Server update time (Unix ms) from an entity body's `updatedAt` or
/// `updated_at` field
fn parse_updated_at(body: &Value) -> Option<i64> {
    let value = body.get("updatedAt").or_else(|| body.get("updated_at"))?;
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.parse::<i64>().ok().or_else(|| {
            chrono::DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|date_time| date_time.timestamp_millis())
        }),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}

/// Client errors are permanent except timeouts, rate limits and auth
/// failures, which can clear up on their own.
fn classify_failure(status: StatusCode, body: &str) -> DispatchError {
    let message = parse_api_error(status, body);
    let retryable = status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT
                | StatusCode::TOO_MANY_REQUESTS
                | StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
        );
    if retryable {
        DispatchError::Transient(message)
    } else {
        DispatchError::Permanent(message)
    }
}

fn normalize_base_url(raw: String) -> crate::Result<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| crate::Error::Config("API base URL must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(crate::Error::Config(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}
