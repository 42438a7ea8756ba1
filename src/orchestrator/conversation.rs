//! Per-chat session state and the store that owns it.
//!
//! A conversation is created lazily on the first message of a chat and
//! lives for the rest of the process.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::orchestrator::message::ChatMessage;
use crate::orchestrator::rate_limit::RateWindow;
use crate::orchestrator::timer::TimerSlot;

/// Messages kept per chat and handed to the assistant.
pub const MAX_RECENT_MESSAGES: usize = 10;

/// Where a conversation stands with respect to AI replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Debouncing,
    InstantActive,
}

pub struct Conversation {
    pub chat_id: String,
    recent: VecDeque<ChatMessage>,
    /// Eligible for AI handling.
    pub triggered: bool,
    /// Replies bypass the debounce delay.
    pub instant: bool,
    pub sent_location: bool,
    pub delivering: bool,
    pub rate_window: RateWindow,
    pub response_timer: TimerSlot,
    pub instant_timer: TimerSlot,
    pub gate_close_timer: TimerSlot,
}

impl Conversation {
    pub fn new(chat_id: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            recent: VecDeque::with_capacity(MAX_RECENT_MESSAGES + 1),
            triggered: false,
            instant: false,
            sent_location: false,
            delivering: false,
            rate_window: RateWindow::new(),
            response_timer: TimerSlot::new(),
            instant_timer: TimerSlot::new(),
            gate_close_timer: TimerSlot::new(),
        }
    }

    /// Append a message, evicting the oldest beyond capacity.
    pub fn push_message(&mut self, msg: ChatMessage) {
        self.recent.push_back(msg);
        while self.recent.len() > MAX_RECENT_MESSAGES {
            self.recent.pop_front();
        }
    }

    pub fn recent_messages(&self) -> Vec<ChatMessage> {
        self.recent.iter().cloned().collect()
    }

    /// Whether an operator replied by hand after `timestamp`.
    pub fn manual_reply_after(&self, timestamp: i64) -> bool {
        self.recent
            .iter()
            .any(|m| m.is_manual_reply() && m.timestamp > timestamp)
    }

    /// Timestamp of the newest message from the other party.
    pub fn latest_inbound_timestamp(&self) -> Option<i64> {
        self.recent.iter().rev().find(|m| !m.from_me).map(|m| m.timestamp)
    }

    /// Back to the safe default: gate assumed closed, session no longer instant.
    pub fn reset_session(&mut self) {
        self.instant = false;
        self.triggered = false;
        self.sent_location = false;
        self.delivering = false;
    }

    pub fn phase(&self) -> Phase {
        if self.instant {
            Phase::InstantActive
        } else if self.response_timer.is_armed() {
            Phase::Debouncing
        } else {
            Phase::Idle
        }
    }
}

/// Arena of conversations keyed by chat id.
#[derive(Default)]
pub struct ConversationStore {
    conversations: Mutex<HashMap<String, Arc<Mutex<Conversation>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(&self, chat_id: &str) -> Arc<Mutex<Conversation>> {
        let mut map = self.conversations.lock().await;
        map.entry(chat_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Conversation::new(chat_id))))
            .clone()
    }

    #[cfg(test)]
    pub async fn get(&self, chat_id: &str) -> Option<Arc<Mutex<Conversation>>> {
        self.conversations.lock().await.get(chat_id).cloned()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.conversations.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: usize, ts: i64) -> ChatMessage {
        ChatMessage::inbound("c1", &id.to_string(), &format!("message {id}"), ts)
    }

    #[test]
    fn test_keeps_last_ten_messages() {
        let mut convo = Conversation::new("c1");
        for i in 0..15 {
            convo.push_message(msg(i, i as i64));
        }
        let recent = convo.recent_messages();
        assert_eq!(recent.len(), MAX_RECENT_MESSAGES);
        assert_eq!(recent[0].message_id, "5");
        assert_eq!(recent[9].message_id, "14");
    }

    #[test]
    fn test_manual_reply_detection_ignores_automated_messages() {
        let mut convo = Conversation::new("c1");
        convo.push_message(msg(1, 100));
        convo.push_message(ChatMessage::automated("c1", "2", "auto", 200));
        assert!(!convo.manual_reply_after(100));

        let mut manual = msg(3, 300);
        manual.from_me = true;
        convo.push_message(manual);
        assert!(convo.manual_reply_after(100));
        assert!(!convo.manual_reply_after(300));
    }

    #[test]
    fn test_reset_session_clears_flags() {
        let mut convo = Conversation::new("c1");
        convo.triggered = true;
        convo.instant = true;
        convo.sent_location = true;
        convo.delivering = true;
        convo.reset_session();
        assert!(!convo.triggered && !convo.instant && !convo.sent_location && !convo.delivering);
        assert_eq!(convo.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_store_creates_lazily_once() {
        let store = ConversationStore::new();
        assert!(store.get("c1").await.is_none());

        let a = store.get_or_create("c1").await;
        a.lock().await.triggered = true;
        let b = store.get_or_create("c1").await;
        assert!(b.lock().await.triggered);
        assert_eq!(store.len().await, 1);
    }
}
