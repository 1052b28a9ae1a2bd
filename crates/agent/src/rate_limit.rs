//! Per-user minimum interval between accepted messages.

use concierge_core::message::UserId;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Remembers when each user last got through and rejects anything sooner
/// than `min_interval` after that.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_accepted: Mutex<HashMap<UserId, Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Accept the message, or return how long the user still has to wait.
    ///
    /// Rejected messages do not push the window forward.
    pub fn check(&self, user_id: &UserId) -> Result<(), Duration> {
        let now = Instant::now();
        let mut last = self.last_accepted.lock().unwrap_or_else(PoisonError::into_inner);

        // Periodic cleanup: if the map grows too large, forget stale entries
        if last.len() > 10_000 {
            last.retain(|_, at| now.duration_since(*at) < self.min_interval);
        }

        if let Some(at) = last.get(user_id) {
            let elapsed = now.duration_since(*at);
            if elapsed < self.min_interval {
                return Err(self.min_interval - elapsed);
            }
        }
        last.insert(user_id.clone(), now);
        Ok(())
    }

    /// Text telling the user how long to wait, in tenths of a second.
    pub fn wait_notice(wait: Duration) -> String {
        format!("Please wait {:.1} seconds before your next message.", wait.as_secs_f64())
    }

    pub fn tracked_users(&self) -> usize {
        self.last_accepted.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
