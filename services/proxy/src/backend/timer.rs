//! One-shot idle shutdown timer.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

/// A single-shot timer; at most one is armed at any time.
///
/// Arming again replaces (and cancels) the pending timer. The callback runs on
/// the timer's own task, so it should only hand work off (for example by
/// posting a message) rather than touch shared state.
#[derive(Debug, Default)]
pub struct ShutdownTimer {
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl ShutdownTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer to run `on_fire` after `after`.
    pub fn schedule<F>(&self, after: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            on_fire();
        });

        if let Some(previous) = self.lock().replace(task) {
            previous.abort();
        }
    }

    /// Cancel the pending timer. Returns whether one was still pending.
    pub fn cancel(&self) -> bool {
        match self.lock().take() {
            Some(task) => {
                let pending = !task.is_finished();
                task.abort();
                pending
            }
            None => false,
        }
    }

    /// Whether a timer is armed and has not fired yet.
    pub fn is_armed(&self) -> bool {
        self.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ShutdownTimer {
    fn drop(&mut self) {
        if let Some(task) = self.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting(fired: &Arc<AtomicU32>, value: u32) -> impl FnOnce() + Send + 'static {
        let fired = Arc::clone(fired);
        move || {
            fired.fetch_add(value, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_fires_once() {
        let timer = ShutdownTimer::new();
        let fired = Arc::new(AtomicU32::new(0));

        timer.schedule(Duration::from_millis(20), counting(&fired, 1));
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
    }

    #[tokio::test]
    async fn test_rearm_replaces_previous() {
        let timer = ShutdownTimer::new();
        let fired = Arc::new(AtomicU32::new(0));

        timer.schedule(Duration::from_millis(30), counting(&fired, 1));
        timer.schedule(Duration::from_millis(30), counting(&fired, 10));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_cancel_prevents_fire() {
        let timer = ShutdownTimer::new();
        let fired = Arc::new(AtomicU32::new(0));

        timer.schedule(Duration::from_millis(30), counting(&fired, 1));
        assert!(timer.cancel());
        assert!(!timer.cancel());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
