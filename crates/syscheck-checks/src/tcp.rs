use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use syscheck_core::{Check, CheckResult};
use tokio::net::TcpStream;
use tracing::debug;

use crate::executable::{parse_settings, CheckOutcome, Executable};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct TcpSettings {
    host: String,
    port: u16,
    timeout_secs: Option<u64>,
}

/// Open a TCP connection and close it again.
#[derive(Debug, Default)]
pub struct TcpConnectCheck;

#[async_trait]
impl Executable for TcpConnectCheck {
    fn check_type(&self) -> &'static str {
        "tcp"
    }

    async fn perform(&self, check: &Check, _last: Option<&CheckResult>) -> CheckOutcome {
        let settings: TcpSettings = match parse_settings(check) {
            Ok(s) => s,
            Err(e) => return CheckOutcome::unexpected(e),
        };
        let target = format!("{}:{}", settings.host, settings.port);
        let timeout = Duration::from_secs(settings.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));

        let started = Instant::now();
        match tokio::time::timeout(timeout, TcpStream::connect(&target)).await {
            Ok(Ok(_stream)) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                debug!(check_id = check.check_id, %target, elapsed_ms, "tcp connect ok");
                CheckOutcome::success(serde_json::json!({ "elapsed_ms": elapsed_ms }))
            }
            Ok(Err(e)) => CheckOutcome::failure(format!("connect to {target} failed: {e}")),
            Err(_) => CheckOutcome::failure(format!("connect to {target} timed out after {timeout:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use syscheck_core::SuccessStatus;
    use tokio::net::TcpListener;

    fn check(port: u16) -> Check {
        Check {
            check_id: 2,
            system_name: "db".into(),
            check_type: "tcp".into(),
            settings: serde_json::json!({ "host": "127.0.0.1", "port": port, "timeout_secs": 2 }),
            enabled: true,
            updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn listening_port_succeeds() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let outcome = TcpConnectCheck.perform(&check(port), None).await;
        assert_eq!(outcome.status, SuccessStatus::Success);
        assert!(outcome.run_data.unwrap().get("elapsed_ms").is_some());
    }

    #[tokio::test]
    async fn closed_port_fails() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let outcome = TcpConnectCheck.perform(&check(port), None).await;
        assert_eq!(outcome.status, SuccessStatus::Failure);
    }
}
