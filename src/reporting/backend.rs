use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

use super::{retry_with_backoff, Reporter, ReportingError, RetryPolicy};
use crate::types::BattleEvent;

/// Body of `POST {backend}/battles/{battle_id}`.
#[derive(Debug, Clone, Serialize)]
pub struct BattleReport {
    pub is_result: bool,
    pub message: String,
    pub reported_by: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
}

impl From<&BattleEvent> for BattleReport {
    fn from(event: &BattleEvent) -> Self {
        Self {
            is_result: event.is_terminal(),
            message: event.message.clone(),
            reported_by: event.reported_by.clone(),
            timestamp: event.timestamp,
            detail: event.detail.clone(),
            markdown_content: event.markdown_content.clone(),
            winner: event.winner().map(|w| w.to_string()),
        }
    }
}

pub struct BackendReporter {
    client: reqwest::Client,
    base_url: String,
    policy: RetryPolicy,
}

impl BackendReporter {
    pub fn new(base_url: &str, policy: RetryPolicy, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/battles/{battle_id}` with the id as one encoded path segment.
    fn battle_url(&self, battle_id: &str) -> Result<String, ReportingError> {
        let invalid = |reason: &str| ReportingError::InvalidUrl {
            url: self.base_url.clone(),
            reason: reason.to_string(),
        };
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| invalid(&e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("cannot be a base"))?
            .pop_if_empty()
            .push("battles")
            .push(battle_id);
        Ok(url.into())
    }

    async fn deliver(&self, event: &BattleEvent) -> Result<(), ReportingError> {
        let url = self.battle_url(&event.battle_id)?;
        let report = BattleReport::from(event);
        let label = if event.is_terminal() {
            "report_terminal"
        } else {
            "report_progress"
        };

        retry_with_backoff(&self.policy, label, || post_json(&self.client, &url, &report)).await
    }
}

#[async_trait]
impl Reporter for BackendReporter {
    async fn report_progress(&self, event: BattleEvent) {
        if let Err(e) = self.deliver(&event).await {
            log::warn!("[battle {}] Dropping progress event: {}", event.battle_id, e);
        }
    }

    async fn report_terminal(&self, event: BattleEvent) -> Result<(), ReportingError> {
        self.deliver(&event).await.map_err(|e| {
            log::error!("[battle {}] Terminal event undelivered: {}", event.battle_id, e);
            e
        })
    }
}

/// One POST, classified: 2xx is delivered, 5xx/408/429 and transport
/// failures are transient, any other status is a rejection.
pub async fn post_json<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    body: &T,
) -> Result<(), ReportingError> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| ReportingError::Transient(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let text = response.text().await.unwrap_or_default();
    if status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
    {
        Err(ReportingError::Transient(format!("HTTP {}: {}", status, text)))
    } else {
        Err(ReportingError::Rejected {
            status: status.as_u16(),
            body: text,
        })
    }
}
