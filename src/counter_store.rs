//! Shared counter storage for the rate limiter.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::algorithms::{WindowCounter, WindowHit};

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter store unreachable: {0}")]
    Unreachable(String),
    #[error("unexpected counter store reply: {0}")]
    Protocol(String),
}

impl From<redis::RedisError> for CounterError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            CounterError::Unreachable(err.to_string())
        } else {
            CounterError::Protocol(err.to_string())
        }
    }
}

/// Storage for window counters.
///
/// `hit` must apply the reset check, the comparison against `max` and the
/// increment as one atomic step; handlers may run in several processes.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn hit(
        &self,
        key: &str,
        max: u64,
        window_ms: u64,
        now_ms: u64,
    ) -> Result<WindowHit, CounterError>;

    async fn ping(&self) -> Result<(), CounterError>;

    /// Drops counters whose window ended before `now_ms`, returning how many.
    /// Backends that expire keys themselves keep the default.
    async fn sweep_expired(&self, _now_ms: u64) -> usize {
        0
    }

    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    counter: WindowCounter,
    window_ms: u64,
}

/// Process-local counters. Atomic within one process only.
#[derive(Debug, Clone, Default)]
pub struct MemoryCounterStore {
    counters: Arc<Mutex<HashMap<String, Slot>>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.counters.lock().await.len()
    }

}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn hit(
        &self,
        key: &str,
        max: u64,
        window_ms: u64,
        now_ms: u64,
    ) -> Result<WindowHit, CounterError> {
        let mut counters = self.counters.lock().await;
        let slot = counters.entry(key.to_string()).or_insert_with(|| Slot {
            counter: WindowCounter::new(now_ms),
            window_ms,
        });
        slot.window_ms = window_ms;
        Ok(slot.counter.hit(max, window_ms, now_ms))
    }

    async fn ping(&self) -> Result<(), CounterError> {
        Ok(())
    }

    async fn sweep_expired(&self, now_ms: u64) -> usize {
        let mut counters = self.counters.lock().await;
        let before = counters.len();
        counters.retain(|_, slot| !slot.counter.is_expired(slot.window_ms, now_ms));
        before - counters.len()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_are_per_key() {
        let store = MemoryCounterStore::new();
        assert!(store.hit("a", 1, 1_000, 0).await.unwrap().allowed);
        assert!(!store.hit("a", 1, 1_000, 1).await.unwrap().allowed);
        assert!(store.hit("b", 1, 1_000, 1).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_sweep_uses_each_counter_window() {
        let store = MemoryCounterStore::new();
        store.hit("short", 5, 1_000, 0).await.unwrap();
        store.hit("long", 5, 60_000, 0).await.unwrap();

        let removed = store.sweep_expired(1_200).await;
        assert_eq!(removed, 1);
        assert_eq!(store.len().await, 1);
        assert!(!store.hit("long", 1, 60_000, 1_300).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_sweep_frees_many_short_windows() {
        let store = MemoryCounterStore::new();
        for i in 0..500 {
            store.hit(&format!("ratelimit:k{}", i), 3, 1, 10).await.unwrap();
        }
        assert_eq!(store.len().await, 500);

        assert_eq!(store.sweep_expired(20).await, 500);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_hits_never_exceed_max() {
        let store = MemoryCounterStore::new();
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.hit("shared", 10, 60_000, 5).await.unwrap().allowed
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }
}
