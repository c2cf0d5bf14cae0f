use serde::Serialize;
use std::time::Duration;

use crate::config::Config;
use crate::reporting::{post_json, retry_with_backoff, ReportingError, RetryPolicy};
use crate::types::ProcessStatus;

#[derive(Debug, Clone, Serialize)]
pub struct ReadyNotice {
    pub ready: bool,
    pub agent_url: String,
    pub pid: Option<u32>,
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl ReadyNotice {
    pub fn new(status: &ProcessStatus, agent_id: Option<&str>) -> Self {
        Self {
            ready: status.is_running(),
            agent_url: status.address.url(),
            pid: status.pid,
            generation: status.generation,
            agent_id: agent_id.map(str::to_string),
        }
    }
}

/// Tells an external caller that a replacement agent is accepting
/// connections.
#[derive(Clone)]
pub struct ReadyNotifier {
    client: reqwest::Client,
    url: String,
    policy: RetryPolicy,
}

impl ReadyNotifier {
    pub fn new(url: impl Into<String>, policy: RetryPolicy, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            url: url.into(),
            policy,
        }
    }

    /// `None` when no `[launcher] notify_url` is configured.
    pub fn from_settings(config: &Config) -> Option<Self> {
        config.launcher.notify_url.as_ref().map(|url| {
            Self::new(
                url.clone(),
                RetryPolicy::from_config(&config.backend),
                Duration::from_secs(config.backend.request_timeout_secs),
            )
        })
    }

    /// Same client and retry policy, different destination.
    pub fn redirected(&self, url: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            url: url.into(),
            policy: self.policy.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn notify(&self, status: &ProcessStatus, agent_id: Option<&str>) -> Result<(), ReportingError> {
        let notice = ReadyNotice::new(status, agent_id);
        retry_with_backoff(&self.policy, "ready_notification", || {
            post_json(&self.client, &self.url, &notice)
        })
        .await?;
        log::info!(
            "Notified {} that {} is ready (generation {})",
            self.url,
            notice.agent_url,
            notice.generation
        );
        Ok(())
    }
}
