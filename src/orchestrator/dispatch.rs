//! Executes assistant tool calls against the stores, gate and channel.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::orchestrator::delivery_log::DeliveryStatus;
use crate::orchestrator::engine::Engine;
use crate::orchestrator::otp_store::OtpResolution;
use crate::orchestrator::tools::ToolCall;

pub const NO_OTP_REPLY: &str = "Sorry, no OTP numbers available.";
pub const OTP_NOT_FOUND_REPLY: &str = "Sorry, OTP not found.";
const CHOOSE_TRACKING_HEADER: &str =
    "Please select a tracking number, reply with the tracking number or line number:\n";

/// Numbered list the courier picks a tracking number from.
pub fn format_tracking_choices(trackings: &[String]) -> String {
    let list = trackings
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{}. {}", i + 1, t))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{CHOOSE_TRACKING_HEADER}{list}")
}

impl Engine {
    /// Run one tool call from a conversation reply.
    pub(crate) async fn execute_tool(self: &Arc<Self>, chat_id: &str, call: &ToolCall) {
        info!("🔧 {} for {chat_id}", call.name());
        match call {
            ToolCall::SendLocation => self.send_location(chat_id).await,
            ToolCall::OpenGate => self.open_gate(chat_id).await,
            ToolCall::AssociateTrackingNumber { tracking_number } => {
                self.associate_tracking_number(chat_id, tracking_number)
            }
            ToolCall::ResolveOtp => self.resolve_otp(chat_id).await,
            ToolCall::SendOtp { tracking_number } => self.send_otp(chat_id, tracking_number).await,
            ToolCall::SaveTrackingOtp { .. } => {
                warn!("Ignoring save_tracking_otp in a conversation reply");
            }
        }
    }

    /// Run one tool call from the extraction prompt.
    pub(crate) fn execute_extraction(&self, call: &ToolCall) {
        match call {
            ToolCall::SaveTrackingOtp { tracking_number, otp } => {
                self.save_tracking_otp(tracking_number, otp)
            }
            other => warn!("Ignoring {} from OTP extraction", other.name()),
        }
    }

    async fn send_location(&self, chat_id: &str) {
        let Some(location) = self.config.location.as_ref() else {
            error!("❌ No location configured");
            self.notify("❌ Failed to send location!").await;
            return;
        };

        match self.messenger.send_location(chat_id, location).await {
            Ok(message_id) => {
                let label = location.title.as_deref().unwrap_or("location");
                self.record_automated(chat_id, &message_id, &format!("📍 {label}")).await;
            }
            Err(e) => {
                error!("❌ Failed to send location: {e}");
                self.notify("❌ Failed to send location!").await;
                return;
            }
        }
        self.send_auto(chat_id, &self.config.messages.location).await;

        let convo = self.conversation(chat_id).await;
        convo.lock().await.sent_location = true;
    }

    fn associate_tracking_number(&self, chat_id: &str, tracking: &str) {
        let tracking = tracking.trim();
        if tracking.is_empty() {
            return;
        }
        self.otps.associate_tracking(chat_id, tracking);
        self.deliveries
            .set_status(tracking, DeliveryStatus::OutForDelivery, Some(chat_id));
    }

    async fn resolve_otp(&self, chat_id: &str) {
        match self.otps.resolve(chat_id) {
            OtpResolution::NoneAvailable => {
                self.send_auto(chat_id, NO_OTP_REPLY).await;
            }
            OtpResolution::Match(tracking) => self.send_otp(chat_id, &tracking).await,
            OtpResolution::Choose(trackings) => {
                info!("❓ {} candidate trackings for {chat_id}", trackings.len());
                self.send_auto(chat_id, &format_tracking_choices(&trackings)).await;
            }
        }
    }

    /// Deliver an OTP once, then forget it.
    async fn send_otp(&self, chat_id: &str, tracking: &str) {
        let tracking = tracking.trim();
        let Some(otp) = self.otps.get_otp(tracking) else {
            self.send_auto(chat_id, OTP_NOT_FOUND_REPLY).await;
            return;
        };
        if self.send_auto(chat_id, &otp).await.is_some() {
            self.otps.remove_otp(tracking);
            info!("🔑 OTP for {tracking} delivered to {chat_id}");
        }
    }

    pub(crate) fn save_tracking_otp(&self, tracking: &str, otp: &str) {
        let (tracking, otp) = (tracking.trim(), otp.trim());
        if tracking.is_empty() || otp.is_empty() {
            warn!("Skipping incomplete OTP extraction");
            return;
        }
        self.otps.save_otp(tracking, otp);
        self.deliveries
            .set_status(tracking, DeliveryStatus::ExpectedSoon, None);
    }
}
