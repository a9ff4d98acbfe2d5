//! Sliding window counter
//!
//! A bounded counter that starts a new window once `window_ms` has elapsed
//! since the window was opened. The counter never exceeds `max` inside one
//! window: a hit at the ceiling is rejected without incrementing.

use super::WindowHit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowCounter {
    pub count: u64,
    pub window_start_ms: u64,
}

impl WindowCounter {
    /// Opens a window at `now_ms`
    pub fn new(now_ms: u64) -> Self {
        Self {
            count: 0,
            window_start_ms: now_ms,
        }
    }

    pub fn is_expired(&self, window_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.window_start_ms) >= window_ms
    }

    /// Applies one request to the counter.
    pub fn hit(&mut self, max: u64, window_ms: u64, now_ms: u64) -> WindowHit {
        if self.is_expired(window_ms, now_ms) {
            self.count = 0;
            self.window_start_ms = now_ms;
        }

        let allowed = self.count < max;
        if allowed {
            self.count += 1;
        }

        WindowHit {
            allowed,
            count: self.count,
            window_start_ms: self.window_start_ms,
        }
    }
}
