//! Rate limiting algorithms module
//!
//! The window arithmetic lives here so the in-memory counter store and the
//! Redis script share one definition of when a window resets.

pub mod sliding_window;

pub use sliding_window::WindowCounter;

use serde::Serialize;

/// Outcome of one atomic increment-and-compare against a counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    pub allowed: bool,
    /// Counter value after this hit
    pub count: u64,
    pub window_start_ms: u64,
}

/// Decision returned to callers of the rate limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at_ms: u64,
    /// True when the counter store failed and the decision is the fail-open default
    pub degraded: bool,
}

impl RateLimitDecision {
    pub fn from_hit(hit: WindowHit, max: u64, window_ms: u64) -> Self {
        Self {
            allowed: hit.allowed,
            limit: max,
            remaining: if hit.allowed {
                max.saturating_sub(hit.count)
            } else {
                0
            },
            reset_at_ms: hit.window_start_ms.saturating_add(window_ms),
            degraded: false,
        }
    }

    /// Seconds until the window resets, rounded up
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_at_ms.saturating_sub(now_ms).div_ceil(1000)
    }
}
