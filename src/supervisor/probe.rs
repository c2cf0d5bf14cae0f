use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use super::LifecycleError;
use crate::config::LauncherConfig;
use crate::types::AgentAddress;

#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub attempts: u32,
    pub interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            attempts: 50,
            interval: Duration::from_millis(200),
            connect_timeout: Duration::from_millis(500),
        }
    }
}

impl ProbeSettings {
    pub fn from_config(config: &LauncherConfig) -> Self {
        Self {
            attempts: config.probe_attempts,
            interval: Duration::from_millis(config.probe_interval_ms),
            connect_timeout: Duration::from_millis(config.probe_connect_timeout_ms),
        }
    }
}

/// One bounded connect attempt.
pub async fn accepts_connections(address: &AgentAddress, connect_timeout: Duration) -> bool {
    matches!(
        timeout(connect_timeout, TcpStream::connect(address.socket_addr())).await,
        Ok(Ok(_))
    )
}

/// Polls `address` until it accepts a TCP connection. `exited` is checked
/// between attempts so a child that dies early fails fast instead of
/// running out the clock.
pub async fn wait_ready<F>(
    address: &AgentAddress,
    settings: &ProbeSettings,
    exited: F,
) -> Result<u32, LifecycleError>
where
    F: Fn() -> Option<String>,
{
    for attempt in 1..=settings.attempts {
        if accepts_connections(address, settings.connect_timeout).await {
            log::debug!("{} ready after {} probe(s)", address, attempt);
            return Ok(attempt);
        }
        if let Some(description) = exited() {
            return Err(LifecycleError::Spawn(format!(
                "child exited before {} became ready: {}",
                address, description
            )));
        }
        sleep(settings.interval).await;
    }

    Err(LifecycleError::ReadinessExhausted {
        address: address.clone(),
        attempts: settings.attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn quick(attempts: u32) -> ProbeSettings {
        ProbeSettings {
            attempts,
            interval: Duration::from_millis(10),
            connect_timeout: Duration::from_millis(100),
        }
    }

    async fn free_address() -> AgentAddress {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        AgentAddress::new("127.0.0.1", port)
    }

    #[tokio::test]
    async fn test_ready_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = AgentAddress::new("127.0.0.1", listener.local_addr().unwrap().port());

        let attempts = wait_ready(&address, &quick(3), || None).await.unwrap();
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_exhausted_when_nothing_listens() {
        let address = free_address().await;

        let err = wait_ready(&address, &quick(3), || None).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::ReadinessExhausted { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_early_exit_fails_fast() {
        let address = free_address().await;

        let err = wait_ready(&address, &quick(100), || Some("exit status: 1".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Spawn(reason) if reason.contains("exit status: 1")));
    }
}
