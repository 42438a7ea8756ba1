//! Gate actuation and the timers that put a conversation back to rest.

use std::sync::Arc;
use tracing::{error, info};

use crate::orchestrator::delivery_log::DeliveryStatus;
use crate::orchestrator::engine::Engine;

impl Engine {
    /// Open the gate once and schedule the close.
    ///
    /// Calling this again while the gate is open re-arms both timers, so a
    /// single close follows the last open.
    pub(crate) async fn open_gate(self: &Arc<Self>, chat_id: &str) {
        if let Err(e) = self.gate.open().await {
            error!("❌ Gate open failed: {e}");
            self.notify("❌ Failed to open the gate!").await;
            self.send_auto(chat_id, &self.config.messages.gate_failed).await;
            self.mark_unread(chat_id).await;
            return;
        }

        self.send_auto(chat_id, &self.config.messages.gate_open).await;
        self.mark_unread(chat_id).await;
        info!("✅ Gate opened for {chat_id}");

        let convo = self.conversation(chat_id).await;
        let mut convo = convo.lock().await;
        convo.instant = true;

        let delay = self.config.auto_close_delay;
        let engine = Arc::clone(self);
        let chat = chat_id.to_string();
        convo.gate_close_timer.arm(delay, async move {
            engine.close_gate(&chat).await;
        });

        let engine = Arc::clone(self);
        let chat = chat_id.to_string();
        convo.instant_timer.arm(delay, async move {
            let convo = engine.conversation(&chat).await;
            let mut convo = convo.lock().await;
            convo.instant = false;
            convo.triggered = false;
            info!("🕓 Instant mode OFF for {chat}");
        });
    }

    /// Close the gate and settle the chat's deliveries.
    async fn close_gate(&self, chat_id: &str) {
        match self.gate.close().await {
            Ok(()) => {
                info!("🔐 Gate closed for {chat_id}");
                for tracking in self.chat_trackings(chat_id) {
                    self.deliveries
                        .set_status(&tracking, DeliveryStatus::Delivered, Some(chat_id));
                    self.otps.remove_tracking_for_phone(chat_id, &tracking);
                }
                self.notify(&format!("Delivery from {chat_id} handled.")).await;
            }
            Err(e) => {
                error!("❌ Failed to close gate: {e}");
                self.notify("❌ Failed to close the gate!").await;
            }
        }

        let convo = self.conversation(chat_id).await;
        convo.lock().await.reset_session();
        info!("🕓 Instant mode OFF for {chat_id}");
    }
}
