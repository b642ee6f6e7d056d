//! Fixed-interval reconnection policy for the event channel.
//!
//! When the connection closes unexpectedly (or fails to open), the
//! [`ConnectionManager`](crate::connection::ConnectionManager) asks the
//! policy whether another attempt is allowed. Every attempt waits the same
//! interval; once the budget is spent the manager stays disconnected until
//! `connect()` is called again.

use std::time::Duration;

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Tunable parameters for reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before each reconnection attempt.
    pub interval: Duration,
    /// Attempts allowed since the last successful open.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONNECT_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Consume one attempt from `attempts`.
    ///
    /// Returns the delay to wait before reconnecting, or `None` when the
    /// budget is exhausted (the counter is left untouched in that case).
    pub fn next_attempt(&self, attempts: &mut u32) -> Option<Duration> {
        if *attempts >= self.max_attempts {
            return None;
        }
        *attempts += 1;
        Some(self.interval)
    }
}
