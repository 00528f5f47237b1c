//! Fixed-window request throttle keyed by caller identity.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
struct RateBucket {
    count: u32,
    window_start: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Denied; the window reopens after this long.
    Denied { retry_after: Duration },
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, RateBucket>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn allow(&self, identity: &str) -> bool {
        self.check_at(identity, Instant::now()) == Decision::Allowed
    }

    pub fn check(&self, identity: &str) -> Decision {
        self.check_at(identity, Instant::now())
    }

    /// Read, increment and write happen under one lock so bursts from the same
    /// identity cannot undercount. Denied calls are not counted.
    pub fn check_at(&self, identity: &str, now: Instant) -> Decision {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let window = self.window;
        buckets.retain(|_, b| now.saturating_duration_since(b.window_start) < window);

        let bucket = buckets.entry(identity.to_string()).or_insert(RateBucket {
            count: 0,
            window_start: now,
        });
        if bucket.count < self.limit {
            bucket.count += 1;
            Decision::Allowed
        } else {
            let elapsed = now.saturating_duration_since(bucket.window_start);
            Decision::Denied {
                retry_after: window.saturating_sub(elapsed),
            }
        }
    }

    /// Identities currently holding a live bucket.
    pub fn tracked(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
