//! Sliding one-hour window of AI invocations per conversation.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Default)]
pub struct RateWindow {
    invocations: VecDeque<Instant>,
}

impl RateWindow {
    pub fn new() -> Self {
        Self { invocations: VecDeque::new() }
    }

    /// Drop entries older than the window, then compare against `cap`.
    pub fn is_exhausted(&mut self, now: Instant, cap: usize) -> bool {
        while let Some(&oldest) = self.invocations.front() {
            if now.duration_since(oldest) >= WINDOW {
                self.invocations.pop_front();
            } else {
                break;
            }
        }
        self.invocations.len() >= cap
    }

    /// Record an admitted invocation.
    pub fn record(&mut self, now: Instant) {
        self.invocations.push_back(now);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.invocations.len()
    }
}
