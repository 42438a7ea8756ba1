//! Seams between the engine and the outside world.
//!
//! Each adapter logs its own failures; the engine only decides what to do
//! next.

use async_trait::async_trait;

use crate::config::LocationConfig;
use crate::orchestrator::message::ChatMessage;
use crate::orchestrator::tools::ToolCall;

/// What the assistant wants to say and do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// The chat channel.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a text, returning the new message id.
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<String, String>;

    async fn send_location(&self, chat_id: &str, location: &LocationConfig) -> Result<String, String>;

    /// Flag the chat for the operator's attention.
    async fn mark_unread(&self, chat_id: &str) -> Result<(), String>;
}

#[async_trait]
pub trait Assistant: Send + Sync {
    /// Reply to a conversation window.
    async fn reply(&self, messages: &[ChatMessage]) -> Result<AssistantReply, String>;

    /// Pull tracking numbers and OTPs out of a single message.
    async fn extract_otp(&self, text: &str) -> Result<Vec<ToolCall>, String>;
}

/// Operational alerts. Best effort, never fails the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str);
}

#[async_trait]
pub trait GateController: Send + Sync {
    async fn open(&self) -> Result<(), String>;
    async fn close(&self) -> Result<(), String>;
}
