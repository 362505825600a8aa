use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use syscheck_core::{Check, CheckResult};
use tracing::debug;

use crate::executable::{last_run_data, parse_settings, CheckOutcome, Executable};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct HttpSettings {
    url: String,
    /// Exact status required. Without it any 2xx/3xx passes.
    expected_status: Option<u16>,
    timeout_secs: Option<u64>,
    /// Responses slower than this pass with a warning.
    warn_after_ms: Option<u64>,
}

/// GET a URL and judge the response status and latency.
pub struct HttpCheck {
    client: reqwest::Client,
}

impl HttpCheck {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executable for HttpCheck {
    fn check_type(&self) -> &'static str {
        "http"
    }

    async fn perform(&self, check: &Check, last: Option<&CheckResult>) -> CheckOutcome {
        let settings: HttpSettings = match parse_settings(check) {
            Ok(s) => s,
            Err(e) => return CheckOutcome::unexpected(e),
        };
        let timeout = Duration::from_secs(settings.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));

        let started = Instant::now();
        let response = self.client.get(&settings.url).timeout(timeout).send().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return CheckOutcome::failure(format!("{} timed out after {timeout:?}", settings.url))
            }
            Err(e) => return CheckOutcome::failure(format!("{} unreachable: {e}", settings.url)),
        };

        let status = response.status().as_u16();
        debug!(check_id = check.check_id, url = %settings.url, status, elapsed_ms, "http check response");

        let status_ok = match settings.expected_status {
            Some(expected) => status == expected,
            None => (200..400).contains(&status),
        };
        if !status_ok {
            return CheckOutcome::failure(format!("{} returned HTTP {status}", settings.url));
        }

        let previous_elapsed_ms = last_run_data(last).and_then(|d| d.get("elapsed_ms")?.as_u64());
        let run_data = serde_json::json!({
            "status": status,
            "elapsed_ms": elapsed_ms,
            "previous_elapsed_ms": previous_elapsed_ms,
        });

        match settings.warn_after_ms {
            Some(limit) if elapsed_ms > limit => CheckOutcome::warning(
                format!("{} took {elapsed_ms}ms (limit {limit}ms)", settings.url),
                run_data,
            ),
            _ => CheckOutcome::success(run_data),
        }
    }
}
