use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;

/// Default timeout for test notifications.
///
/// Chosen empirically: the conditions tests wait for resolve within a few
/// seconds, so anything beyond this means the condition is unreachable.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// A wrapper around [`Arc<Notify>`] that panics instead of hanging.
///
/// Tests wait on pipeline conditions that may never be reached when the code
/// under test is broken; the timeout turns such hangs into immediate, clearly
/// attributed failures.
#[derive(Clone)]
pub struct TimedNotify {
    notify: Arc<Notify>,
    timeout_duration: Duration,
}

impl TimedNotify {
    /// Creates a [`TimedNotify`] with the default timeout.
    pub fn new(notify: Arc<Notify>) -> Self {
        Self::with_timeout(notify, DEFAULT_NOTIFY_TIMEOUT)
    }

    /// Creates a [`TimedNotify`] with a custom timeout.
    pub fn with_timeout(notify: Arc<Notify>, timeout_duration: Duration) -> Self {
        Self {
            notify,
            timeout_duration,
        }
    }

    /// Waits for the notification.
    ///
    /// # Panics
    ///
    /// Panics when the timeout elapses first, so the test fails fast with a
    /// pointer at the unmet condition instead of hanging.
    pub async fn notified(&self) {
        if timeout(self.timeout_duration, self.notify.notified())
            .await
            .is_err()
        {
            panic!(
                "Test notification timed out after {:?}. \
                 The expected pipeline condition was never reached.",
                self.timeout_duration
            );
        }
    }
}
