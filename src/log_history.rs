//! Tracing layer that keeps recent log lines for the dashboard.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

pub const DEFAULT_CAPACITY: usize = 500;

/// Bounded, shared buffer of formatted log lines.
#[derive(Clone)]
pub struct LogHistory {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.push_back(line);
        while lines.len() > self.capacity {
            lines.pop_front();
        }
    }

    /// Oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn layer(&self) -> LogHistoryLayer {
        LogHistoryLayer { history: self.clone() }
    }
}

impl Default for LogHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

pub struct LogHistoryLayer {
    history: LogHistory,
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for LogHistoryLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::INFO {
            return;
        }

        let mut visitor = MessageVisitor { message: String::new() };
        event.record(&mut visitor);

        let prefix = match level {
            Level::ERROR => "❌ ",
            Level::WARN => "⚠️ ",
            _ => "",
        };
        let time = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");
        self.history
            .push(format!("{time} {level:>5} {prefix}{}", visitor.message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_keeps_only_latest_lines() {
        let history = LogHistory::new(3);
        for i in 0..5 {
            history.push(format!("line {i}"));
        }
        assert_eq!(history.lines(), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_layer_records_info_and_above() {
        let history = LogHistory::new(10);
        let subscriber = tracing_subscriber::registry().with(history.layer());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("gate opened");
            tracing::debug!("chatter");
            tracing::error!("gate failed");
        });

        let lines = history.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("INFO gate opened"));
        assert!(lines[1].contains("ERROR ❌ gate failed"));
    }
}
