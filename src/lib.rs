pub mod config;
pub mod dashboard;
pub mod gate_http;
pub mod log_history;
pub mod notify;
pub mod openai;
pub mod orchestrator;
pub mod telegram;
