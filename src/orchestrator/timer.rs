//! Cancellable one-shot timers, one live task per slot.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Holds at most one scheduled task.
///
/// Arming the slot cancels whatever was scheduled before, so re-arming
/// resets the delay instead of stacking a second task. A task whose delay
/// has already elapsed is detached and runs to completion even if the slot
/// is re-armed or dropped afterwards.
#[derive(Default)]
pub struct TimerSlot {
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Schedule `task` to run after `delay`, cancelling any pending task.
    pub fn arm<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            sleep(delay).await;
            tokio::spawn(task);
        }));
    }

    /// Cancel the pending task, if it has not fired yet.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// True while a task is waiting for its delay to elapse.
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut slot = TimerSlot::new();

        slot.arm(Duration::from_millis(50), counting_task(&counter));
        assert!(slot.is_armed());
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!slot.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_resets_instead_of_stacking() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut slot = TimerSlot::new();

        for _ in 0..5 {
            slot.arm(Duration::from_millis(50), counting_task(&counter));
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_drop() {
        let counter = Arc::new(AtomicUsize::new(0));

        let mut slot = TimerSlot::new();
        slot.arm(Duration::from_millis(50), counting_task(&counter));
        slot.cancel();
        assert!(!slot.is_armed());

        let mut dropped = TimerSlot::new();
        dropped.arm(Duration::from_millis(50), counting_task(&counter));
        drop(dropped);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
