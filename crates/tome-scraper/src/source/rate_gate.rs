//! Request pacing for the Hardcover API
//!
//! Consecutive requests are spaced by at least `60s / requests_per_minute`.
//! There is no burst allowance: an idle period does not bank extra requests.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

#[derive(Debug)]
pub struct RateGate {
    interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let interval = Duration::from_secs(60) / requests_per_minute.max(1);
        Self {
            interval,
            last_request: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep until the next request may be issued, then claim the slot.
    ///
    /// The first call returns immediately. Concurrent callers are serialized
    /// by the lock, so each of them gets its own slot.
    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.interval {
                let remaining = self.interval - elapsed;
                debug!(wait_ms = remaining.as_millis() as u64, "Rate limiting request");
                sleep(remaining).await;
            }
        }
        *last = Some(Instant::now());
    }
}
