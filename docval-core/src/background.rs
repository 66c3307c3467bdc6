//! Periodic background tasks with explicit shutdown

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handle to a periodic task
///
/// The task holds only a weak reference to its target, so it also ends
/// once the target is dropped.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Run `tick` every `interval`, first after one full interval
    pub fn spawn<T, F, Fut>(
        name: &'static str,
        target: &Arc<T>,
        interval: Duration,
        mut tick: F,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: FnMut(Arc<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let target: Weak<T> = Arc::downgrade(target);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let Some(target) = target.upgrade() else { break };
                        tick(target).await;
                    }
                }
            }
            debug!(task = name, "Background task stopped");
        });

        Self {
            name,
            shutdown_tx,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(task = self.name, error = %e, "Background task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_interval_until_shutdown() {
        let counter = Arc::new(AtomicUsize::new(0));
        let interval = Duration::from_secs(10);
        let task = BackgroundTask::spawn("count", &counter, interval, |c| async move {
            c.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        task.shutdown().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_target_dropped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = BackgroundTask::spawn("count", &counter, Duration::from_secs(1), |c| async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        drop(counter);
        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(task.is_finished());
    }
}
