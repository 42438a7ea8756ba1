//! Conversation engine: turns inbound chat events into replies and actions.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{Config, LocationConfig, MessageTemplates};
use crate::orchestrator::collaborators::{Assistant, GateController, Messenger, Notifier};
use crate::orchestrator::conversation::{Conversation, ConversationStore};
use crate::orchestrator::delivery_log::DeliveryLog;
use crate::orchestrator::ignore_list::IgnoreList;
use crate::orchestrator::message::{ChatMessage, now_ms};
use crate::orchestrator::otp_store::OtpStore;
use crate::orchestrator::persist::StateBus;
use crate::orchestrator::trigger::TriggerFilter;

/// Title used for every operational notification.
pub const NOTIFY_TITLE: &str = "Gatebot";

const IGNORE_COMMAND: &str = "!ignore";
const UNIGNORE_COMMAND: &str = "!unignore";
const UNIGNORE_REPLY: &str = "You will no longer be ignored.";

/// Engine settings, derived from [`Config`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub triggers: TriggerFilter,
    pub otp_triggers: TriggerFilter,
    pub max_messages_per_hour: usize,
    pub response_delay: Duration,
    pub auto_close_delay: Duration,
    pub location: Option<LocationConfig>,
    pub messages: MessageTemplates,
    pub session_dir: PathBuf,
    pub retention: Duration,
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            triggers: TriggerFilter::new(config.trigger_patterns.clone()),
            otp_triggers: TriggerFilter::new(config.otp_trigger_patterns.clone()),
            max_messages_per_hour: config.max_messages_per_hour,
            response_delay: config.response_delay,
            auto_close_delay: config.auto_close_delay,
            location: config.location.clone(),
            messages: config.messages.clone(),
            session_dir: config.session_dir.clone(),
            retention: config.retention,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            triggers: TriggerFilter::default(),
            otp_triggers: TriggerFilter::default(),
            max_messages_per_hour: 20,
            response_delay: Duration::from_millis(300_000),
            auto_close_delay: Duration::from_millis(120_000),
            location: None,
            messages: MessageTemplates::default(),
            session_dir: PathBuf::from("."),
            retention: Duration::from_secs(14 * 24 * 60 * 60),
        }
    }
}

/// Adapters the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub messenger: Arc<dyn Messenger>,
    pub assistant: Arc<dyn Assistant>,
    pub notifier: Arc<dyn Notifier>,
    pub gate: Arc<dyn GateController>,
}

/// Something that happened on the chat channel.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// The channel is connected and delivering messages.
    Ready,
    Message(ChatMessage),
    Call { chat_id: String },
}

pub struct Engine {
    pub(crate) config: EngineConfig,
    conversations: ConversationStore,
    pub(crate) otps: Arc<OtpStore>,
    pub(crate) deliveries: Arc<DeliveryLog>,
    ignored: IgnoreList,
    bus: StateBus,
    ready: AtomicBool,
    pub(crate) messenger: Arc<dyn Messenger>,
    pub(crate) assistant: Arc<dyn Assistant>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) gate: Arc<dyn GateController>,
}

impl Engine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Arc<Self> {
        let bus = StateBus::new();
        let otps = Arc::new(OtpStore::new(&config.session_dir, config.retention, bus.clone()));
        let deliveries = Arc::new(DeliveryLog::new(&config.session_dir, config.retention, bus.clone()));
        let ignored = IgnoreList::load(&config.session_dir);

        otps.cleanup_expired();
        deliveries.cleanup();

        if config.triggers.is_empty() {
            warn!("No TRIGGER_KEYWORDS configured, conversations will never trigger");
        }

        Arc::new(Self {
            config,
            conversations: ConversationStore::new(),
            otps,
            deliveries,
            ignored,
            bus,
            ready: AtomicBool::new(false),
            messenger: collaborators.messenger,
            assistant: collaborators.assistant,
            notifier: collaborators.notifier,
            gate: collaborators.gate,
        })
    }

    pub fn otps(&self) -> &Arc<OtpStore> {
        &self.otps
    }

    pub fn deliveries(&self) -> &Arc<DeliveryLog> {
        &self.deliveries
    }

    pub fn bus(&self) -> &StateBus {
        &self.bus
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub async fn conversation(&self, chat_id: &str) -> Arc<Mutex<Conversation>> {
        self.conversations.get_or_create(chat_id).await
    }

    pub async fn handle_event(self: &Arc<Self>, event: InboundEvent) {
        match event {
            InboundEvent::Ready => self.handle_ready().await,
            InboundEvent::Message(msg) => self.handle_message(msg).await,
            InboundEvent::Call { chat_id } => self.handle_call(&chat_id).await,
        }
    }

    async fn handle_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.bus.emit();
        info!("✅ Channel ready");
        self.notify("✅ Gatebot is ready!").await;
    }

    async fn handle_call(&self, chat_id: &str) {
        self.notify(&format!("📞 Rejecting call from {chat_id}")).await;
        if let Err(e) = self.messenger.send_text(chat_id, &self.config.messages.call).await {
            error!("Failed to answer call from {chat_id}: {e}");
        }
        self.mark_unread(chat_id).await;
    }

    /// Handle an incoming or self-authored message.
    pub async fn handle_message(self: &Arc<Self>, msg: ChatMessage) {
        let chat_id = msg.chat_id.clone();
        info!("📨 {} ({}): \"{}\"", chat_id, if msg.from_me { "me" } else { "them" }, msg.preview());

        let command = msg.text.trim().to_lowercase();
        if command == IGNORE_COMMAND {
            self.ignored.add(&chat_id);
            self.reply_plain(&chat_id, &format!("Ignoring {chat_id}")).await;
            self.mark_unread(&chat_id).await;
            info!("🚫 {chat_id} added to ignore list");
            return;
        }
        if command == UNIGNORE_COMMAND {
            self.ignored.remove(&chat_id);
            self.reply_plain(&chat_id, UNIGNORE_REPLY).await;
            self.mark_unread(&chat_id).await;
            info!("✅ {chat_id} removed from ignore list");
            return;
        }

        if msg.is_group || self.ignored.contains(&chat_id) {
            debug!("🚫 Ignored chat or group: {chat_id}");
            return;
        }

        if !msg.from_me && self.config.otp_triggers.matches(&msg.text) {
            self.process_otp_message(&msg).await;
            return;
        }

        let convo_arc = self.conversation(&chat_id).await;
        let mut convo = convo_arc.lock().await;
        convo.push_message(msg.clone());

        if msg.from_me {
            return;
        }

        if !convo.triggered {
            convo.triggered = self.config.triggers.matches(&msg.text);
            if !convo.triggered {
                info!("⛔ No trigger words for {chat_id}");
                return;
            }
            info!("🎯 Conversation {chat_id} triggered");
        }

        let now = tokio::time::Instant::now();
        if convo.rate_window.is_exhausted(now, self.config.max_messages_per_hour) {
            drop(convo);
            warn!("Rate limit reached for {chat_id}");
            self.notify(&format!("⛔ Rate limit exceeded for {chat_id}")).await;
            return;
        }

        if convo.instant {
            convo.rate_window.record(now);
            drop(convo);
            self.handle_ai_response(&chat_id).await;
            return;
        }

        self.schedule_response(&mut convo, msg.timestamp);
    }

    /// Messages from the OTP sender: store what the assistant extracts, nothing else.
    async fn process_otp_message(&self, msg: &ChatMessage) {
        let body = msg.text.trim();
        if body.is_empty() {
            return;
        }
        info!("🔑 OTP message from {}", msg.chat_id);
        match self.assistant.extract_otp(body).await {
            Ok(calls) => {
                for call in calls {
                    self.execute_extraction(&call);
                }
            }
            Err(e) => error!("OTP extraction failed: {e}"),
        }
    }

    /// Send a text on the engine's behalf and remember it in the conversation.
    pub(crate) async fn send_auto(&self, chat_id: &str, text: &str) -> Option<String> {
        match self.messenger.send_text(chat_id, text).await {
            Ok(message_id) => {
                info!("📤 Sent to {chat_id}: \"{}\"", text.chars().take(50).collect::<String>());
                self.record_automated(chat_id, &message_id, text).await;
                Some(message_id)
            }
            Err(e) => {
                error!("Failed to send to {chat_id}: {e}");
                None
            }
        }
    }

    pub(crate) async fn record_automated(&self, chat_id: &str, message_id: &str, text: &str) {
        let convo = self.conversation(chat_id).await;
        convo
            .lock()
            .await
            .push_message(ChatMessage::automated(chat_id, message_id, text, now_ms()));
    }

    /// Reply outside any conversation flow.
    async fn reply_plain(&self, chat_id: &str, text: &str) {
        if let Err(e) = self.messenger.send_text(chat_id, text).await {
            error!("Failed to reply to {chat_id}: {e}");
        }
    }

    pub(crate) async fn mark_unread(&self, chat_id: &str) {
        if let Err(e) = self.messenger.mark_unread(chat_id).await {
            warn!("Failed to mark {chat_id} unread: {e}");
        }
    }

    pub(crate) async fn notify(&self, message: &str) {
        self.notifier.notify(NOTIFY_TITLE, message).await;
    }
}
