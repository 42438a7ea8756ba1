//! Chat message types shared by the engine and the channel adapters.

use serde::{Deserialize, Serialize};

/// Max chars shown when a message is logged.
const PREVIEW_CHARS: usize = 50;

/// A chat message with the metadata the engine needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub chat_id: String,
    /// Authored by this account (an operator or the engine itself).
    pub from_me: bool,
    /// Sent by the engine rather than typed by a human operator.
    #[serde(default)]
    pub automated: bool,
    #[serde(default)]
    pub is_group: bool,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub text: String,
    /// Attached images: (bytes, media_type)
    #[serde(skip)]
    pub images: Vec<(Vec<u8>, String)>,
}

impl ChatMessage {
    /// A plain inbound text message from the other party.
    pub fn inbound(chat_id: &str, message_id: &str, text: &str, timestamp: i64) -> Self {
        Self {
            message_id: message_id.to_string(),
            chat_id: chat_id.to_string(),
            from_me: false,
            automated: false,
            is_group: false,
            timestamp,
            text: text.to_string(),
            images: Vec::new(),
        }
    }

    /// A message the engine has just sent on its own.
    pub fn automated(chat_id: &str, message_id: &str, text: &str, timestamp: i64) -> Self {
        Self {
            from_me: true,
            automated: true,
            ..Self::inbound(chat_id, message_id, text, timestamp)
        }
    }

    /// Self-authored by a human, i.e. an operator replying by hand.
    pub fn is_manual_reply(&self) -> bool {
        self.from_me && !self.automated
    }

    pub fn preview(&self) -> String {
        self.text.chars().take(PREVIEW_CHARS).collect()
    }
}

/// Current time as Unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
