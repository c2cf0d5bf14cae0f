//! Delivery of battle events to the results backend.
//!
//! Progress events are best effort: transient failures are retried and then
//! logged and dropped. Terminal events must arrive; exhausting the retry
//! budget is returned to the caller as [`ReportingError::Exhausted`].

pub mod backend;
pub mod recording;
pub mod retry;

pub use backend::{post_json, BackendReporter, BattleReport};
pub use recording::RecordingReporter;
pub use retry::{retry_with_backoff, RetryPolicy};

use async_trait::async_trait;

use crate::types::BattleEvent;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ReportingError {
    #[error("Transient delivery failure: {0}")]
    Transient(String),

    #[error("Backend rejected report with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Delivery failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("Invalid backend URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[async_trait]
pub trait Reporter: Send + Sync {
    /// Never fails from the caller's point of view.
    async fn report_progress(&self, event: BattleEvent);

    async fn report_terminal(&self, event: BattleEvent) -> Result<(), ReportingError>;
}

/// Used when no backend is configured: events only reach the log.
#[derive(Debug, Default, Clone)]
pub struct LogReporter;

#[async_trait]
impl Reporter for LogReporter {
    async fn report_progress(&self, event: BattleEvent) {
        log::info!("[battle {}] {}: {}", event.battle_id, event.reported_by, event.message);
    }

    async fn report_terminal(&self, event: BattleEvent) -> Result<(), ReportingError> {
        log::info!(
            "[battle {}] result {}: {}",
            event.battle_id,
            event.winner().map(|w| w.as_str()).unwrap_or("-"),
            event.message
        );
        Ok(())
    }
}
