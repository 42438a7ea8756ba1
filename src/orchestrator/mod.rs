//! Orchestrator - per-chat conversations, tool dispatch, gate and OTP stores.

pub mod collaborators;
pub mod conversation;
pub mod delivery_log;
pub mod dispatch;
pub mod engine;
pub mod gate;
pub mod ignore_list;
pub mod message;
pub mod otp_store;
pub mod persist;
pub mod rate_limit;
pub mod scheduler;
pub mod timer;
pub mod tools;
pub mod trigger;


pub use collaborators::{Assistant, AssistantReply, GateController, Messenger, Notifier};
pub use delivery_log::{DeliveryLog, DeliveryRecord, DeliveryStatus, RemoveError};
pub use engine::{Collaborators, Engine, EngineConfig, InboundEvent};
pub use message::ChatMessage;
pub use otp_store::{OtpRecord, OtpResolution, OtpStore};
pub use persist::StateBus;
pub use tools::ToolCall;
