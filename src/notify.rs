//! Pushover notifications for the operator.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::orchestrator::Notifier;

const PUSHOVER_URL: &str = "https://api.pushover.net/1/messages.json";

pub struct PushoverNotifier {
    http: reqwest::Client,
    /// (token, user); `None` only logs.
    credentials: Option<(String, String)>,
}

impl PushoverNotifier {
    pub fn new(token: Option<String>, user: Option<String>) -> Self {
        let credentials = match (token, user) {
            (Some(token), Some(user)) if !token.is_empty() && !user.is_empty() => Some((token, user)),
            _ => {
                info!("Pushover not configured, notifications are logged only");
                None
            }
        };
        Self { http: reqwest::Client::new(), credentials }
    }

    pub fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }
}

#[async_trait]
impl Notifier for PushoverNotifier {
    async fn notify(&self, title: &str, message: &str) {
        info!("🔔 {title}: {message}");
        let Some((token, user)) = self.credentials.clone() else {
            return;
        };

        let http = self.http.clone();
        let form = [
            ("token", token),
            ("user", user),
            ("title", title.to_string()),
            ("message", message.to_string()),
        ];
        tokio::spawn(async move {
            match http.post(PUSHOVER_URL).form(&form).send().await {
                Ok(response) if response.status().is_success() => debug!("Pushover delivered"),
                Ok(response) => warn!("❌ Pushover failed: {}", response.status()),
                Err(e) => warn!("❌ Pushover failed: {e}"),
            }
        });
    }
}
