//! A background task that periodically refreshes provider state.
use std::{future::Future, time::Duration};

use rand::{thread_rng, Rng};
use tokio::{sync::oneshot, task::JoinHandle};

/// Configuration for [`Poller`].
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Interval to wait between refreshes.
    ///
    /// Defaults to [`PollerConfig::DEFAULT_POLL_INTERVAL`].
    pub interval: Duration,
    /// Jitter applies a randomized duration to wait between refreshes. This helps to avoid
    /// multiple instances synchronizing and producing spiky network load.
    ///
    /// Defaults to [`PollerConfig::DEFAULT_POLL_JITTER`].
    pub jitter: Duration,
}

impl PollerConfig {
    /// Default value for [`PollerConfig::interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
    /// Default value for [`PollerConfig::jitter`].
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(3);

    /// Create a new `PollerConfig` using default configuration.
    pub fn new() -> PollerConfig {
        PollerConfig::default()
    }

    /// Update poll interval with `interval`.
    pub fn with_interval(mut self, interval: Duration) -> PollerConfig {
        self.interval = interval;
        self
    }

    /// Update poll interval jitter with `jitter`.
    pub fn with_jitter(mut self, jitter: Duration) -> PollerConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for PollerConfig {
    fn default() -> PollerConfig {
        PollerConfig {
            interval: PollerConfig::DEFAULT_POLL_INTERVAL,
            jitter: PollerConfig::DEFAULT_POLL_JITTER,
        }
    }
}

/// A poller task.
///
/// The task waits one (jittered) interval, runs the refresh callback, and repeats until stopped.
/// The first refresh happens after the first interval: initial loading is the caller's job.
///
/// Dropping the poller aborts the task.
pub struct Poller {
    /// Used to send a stop command to the poller task.
    stop_sender: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl Poller {
    /// Spawn the poller on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn spawn<F, Fut>(config: PollerConfig, mut refresh: F) -> Poller
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_sender, mut stop_receiver) = oneshot::channel::<()>();

        let join_handle = tokio::spawn(async move {
            loop {
                let timeout = jitter(config.interval, config.jitter);
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {}
                    // Either a stop command or a dropped sender.
                    _ = &mut stop_receiver => {
                        log::debug!(target: "flagswitch", "poller received stop command");
                        return;
                    }
                }

                log::debug!(target: "flagswitch", "poller refreshing");
                refresh().await;
            }
        });

        Poller {
            stop_sender: Some(stop_sender),
            join_handle: Some(join_handle),
        }
    }

    /// Stop the poller.
    ///
    /// This function does not wait for the task to actually stop. A refresh that is already running
    /// completes.
    pub fn stop(&mut self) {
        if let Some(stop_sender) = self.stop_sender.take() {
            // Error means the task has already exited.
            let _ = stop_sender.send(());
        }
    }

    /// Stop the poller and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(join_handle) = self.join_handle.take() {
            if let Err(err) = join_handle.await {
                log::warn!(target: "flagswitch", "poller task failed: {err}");
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
