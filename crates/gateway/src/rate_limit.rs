//! Rate Limiter (C6): sliding-window counters in the shared store, keyed
//! by (subject, action kind). Two independent counters are checked per
//! call, one per user and one per IP, and either exceeding the max denies
//! the request. Store failures fail open (counted as 0).

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::store::{rate_limit_ip_key, rate_limit_user_key, SharedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    window: Duration,
    max: u64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn SharedStore>, window: Duration, max: u64) -> Self {
        Self { store, window, max }
    }

    /// Increments the per-user and per-IP counters for `kind` and returns
    /// `Denied` if either now exceeds `max`.
    pub async fn check(&self, user_id: &str, ip: &str, kind: &str) -> Decision {
        let user_count = self.increment(&rate_limit_user_key(user_id, kind)).await;
        let ip_count = self.increment(&rate_limit_ip_key(ip, kind)).await;
        if user_count > self.max || ip_count > self.max {
            Decision::Denied
        } else {
            Decision::Allowed
        }
    }

    async fn increment(&self, key: &str) -> u64 {
        match self.store.incr_with_ttl(key, self.window).await {
            Ok(count) => count.max(0) as u64,
            Err(e) => {
                warn!(key, error = %e, "rate limiter: store failure, failing open");
                0
            }
        }
    }
}
