//! Gate controller that calls configured HTTP endpoints.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::orchestrator::GateController;

/// Upper bound on a single open or close call.
pub const GATE_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs an empty JSON object to the open or close URL.
pub struct HttpGate {
    http: reqwest::Client,
    open_url: Option<String>,
    close_url: Option<String>,
}

impl HttpGate {
    pub fn new(open_url: Option<String>, close_url: Option<String>) -> Self {
        Self::with_timeout(open_url, close_url, GATE_TIMEOUT)
    }

    pub fn with_timeout(open_url: Option<String>, close_url: Option<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build gate HTTP client: {e}");
                reqwest::Client::new()
            });
        Self { http, open_url, close_url }
    }

    async fn post(&self, action: &str, url: Option<&str>) -> Result<(), String> {
        let url = url.ok_or_else(|| format!("No URL configured to {action} the gate"))?;
        debug!("Gate {action}: POST {url}");
        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| format!("HTTP error: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("Gate {action} returned {}", response.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl GateController for HttpGate {
    async fn open(&self) -> Result<(), String> {
        self.post("open", self.open_url.as_deref()).await
    }

    async fn close(&self) -> Result<(), String> {
        self.post("close", self.close_url.as_deref()).await
    }
}
