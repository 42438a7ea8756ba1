//! Reply timing: debounce while idle, immediate replies in instant mode.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::orchestrator::conversation::Conversation;
use crate::orchestrator::delivery_log::DeliveryStatus;
use crate::orchestrator::engine::Engine;

/// Reply text meaning "nothing to say".
const SILENT_REPLY: &str = "...";

impl Engine {
    /// (Re)arm the debounce timer for a triggered conversation.
    pub(crate) fn schedule_response(self: &Arc<Self>, convo: &mut Conversation, trigger_timestamp: i64) {
        info!("⏳ Reply to {} in {:?}", convo.chat_id, self.config.response_delay);
        self.arm_response(convo, self.config.response_delay, trigger_timestamp);
    }

    fn arm_response(self: &Arc<Self>, convo: &mut Conversation, delay: Duration, trigger_timestamp: i64) {
        let engine = Arc::clone(self);
        let chat_id = convo.chat_id.clone();
        convo.response_timer.arm(delay, async move {
            engine.on_response_timer(&chat_id, trigger_timestamp).await;
        });
    }

    /// Debounce elapsed: reply unless a human got there first.
    async fn on_response_timer(self: &Arc<Self>, chat_id: &str, trigger_timestamp: i64) {
        {
            let convo = self.conversation(chat_id).await;
            let mut convo = convo.lock().await;
            if convo.manual_reply_after(trigger_timestamp) {
                info!("🛑 Manual reply in {chat_id}, skipping assistant");
                return;
            }
            convo.rate_window.record(tokio::time::Instant::now());
        }
        self.handle_ai_response(chat_id).await;
    }

    /// Ask the assistant, run its tool calls, then send its text.
    pub(crate) async fn handle_ai_response(self: &Arc<Self>, chat_id: &str) {
        let (messages, location_already_sent) = {
            let convo = self.conversation(chat_id).await;
            let convo = convo.lock().await;
            (convo.recent_messages(), convo.sent_location)
        };

        info!("💬 Asking assistant for {chat_id} ({} messages)", messages.len());
        let reply = match self.assistant.reply(&messages).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Assistant failed for {chat_id}: {e}");
                return;
            }
        };

        for call in &reply.tool_calls {
            self.execute_tool(chat_id, call).await;
        }

        let text = reply.text.trim();
        if text.is_empty() || text == SILENT_REPLY {
            return;
        }
        if self.send_auto(chat_id, text).await.is_none() {
            return;
        }
        self.mark_unread(chat_id).await;

        let newly_delivering = {
            let convo = self.conversation(chat_id).await;
            let mut convo = convo.lock().await;
            let newly_delivering = location_already_sent && convo.sent_location && !convo.delivering;
            if newly_delivering {
                convo.delivering = true;
            }
            self.enter_instant_mode(&mut convo);
            newly_delivering
        };

        if newly_delivering {
            info!("🚚 {chat_id} is delivering");
            for tracking in self.chat_trackings(chat_id) {
                self.deliveries
                    .set_status(&tracking, DeliveryStatus::Delivering, Some(chat_id));
            }
        }
    }

    /// Replies skip the debounce until the instant timer runs out.
    ///
    /// A response still pending here was scheduled for messages that came in
    /// while the assistant was busy, so it fires right away.
    pub(crate) fn enter_instant_mode(self: &Arc<Self>, convo: &mut Conversation) {
        convo.instant = true;
        if convo.response_timer.is_armed() {
            if let Some(latest) = convo.latest_inbound_timestamp() {
                info!("⚡ Answering {} without waiting", convo.chat_id);
                self.arm_response(convo, Duration::ZERO, latest);
            }
        }
        let engine = Arc::clone(self);
        let chat_id = convo.chat_id.clone();
        convo.instant_timer.arm(self.config.auto_close_delay, async move {
            let convo = engine.conversation(&chat_id).await;
            convo.lock().await.reset_session();
            info!("🕓 Instant mode OFF for {chat_id}");
        });
    }

    /// Tracking numbers tied to a chat: its OTP associations plus open deliveries.
    pub(crate) fn chat_trackings(&self, chat_id: &str) -> Vec<String> {
        let mut trackings = self.otps.trackings_for_phone(chat_id);
        for tracking in self.deliveries.open_for_chat(chat_id) {
            if !trackings.contains(&tracking) {
                trackings.push(tracking);
            }
        }
        trackings
    }
}
