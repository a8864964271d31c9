//! Redelivery suppression for access events
//!
//! Event sources deliver at least once. The deduplicator remembers event
//! ids for a fixed TTL so a redelivered event is not evaluated twice.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Event-id cache with a fixed time-to-live
pub struct EventDeduplicator {
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl EventDeduplicator {
    /// A zero `ttl` disables deduplication
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Record `event_id`; returns `false` if it was already seen within the TTL
    pub async fn first_delivery(&self, event_id: &str) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let now = Instant::now();
        let mut seen = self.seen.lock().await;
        seen.retain(|_, at| now.duration_since(*at) < self.ttl);

        if seen.contains_key(event_id) {
            tracing::debug!(event_id, "Duplicate delivery suppressed");
            return false;
        }
        seen.insert(event_id.to_string(), now);
        true
    }

    /// Drop `event_id` so its next delivery is processed again
    pub async fn forget(&self, event_id: &str) {
        if self.seen.lock().await.remove(event_id).is_some() {
            tracing::debug!(event_id, "Event id released for redelivery");
        }
    }

    /// Ids currently remembered
    pub async fn tracked(&self) -> usize {
        self.seen.lock().await.len()
    }
}
