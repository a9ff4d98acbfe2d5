use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::Duration;

use crate::algorithms::WindowHit;
use crate::counter_store::{CounterError, CounterStore};

/// Reset, compare and increment in one server-side step. The key expires
/// when its window ends, so idle counters disappear on their own.
const WINDOW_HIT_SCRIPT: &str = r#"
local max = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

local start = tonumber(redis.call('HGET', KEYS[1], 'window_start'))
local count = tonumber(redis.call('HGET', KEYS[1], 'count'))

if start == nil or count == nil or now - start >= window then
  start = now
  count = 0
end

local allowed = 0
if count < max then
  count = count + 1
  allowed = 1
end

redis.call('HSET', KEYS[1], 'window_start', start, 'count', count)
local ttl = start + window - now
if ttl < 1 then
  ttl = 1
end
redis.call('PEXPIRE', KEYS[1], ttl)

return {allowed, count, start}
"#;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RedisCounterStore {
    connection: ConnectionManager,
    script: Script,
}

impl RedisCounterStore {
    pub async fn connect(redis_url: &str) -> Result<Self, CounterError> {
        let client = Client::open(redis_url)
            .map_err(|e| CounterError::Unreachable(format!("Failed to create Redis client: {}", e)))?;

        let connection = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| CounterError::Unreachable("Timed out connecting to Redis".to_string()))?
            .map_err(|e| CounterError::Unreachable(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            connection,
            script: Script::new(WINDOW_HIT_SCRIPT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn hit(
        &self,
        key: &str,
        max: u64,
        window_ms: u64,
        now_ms: u64,
    ) -> Result<WindowHit, CounterError> {
        let mut conn = self.connection.clone();

        let (allowed, count, window_start_ms): (i64, u64, u64) = self
            .script
            .key(key)
            .arg(max)
            .arg(window_ms)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(WindowHit {
            allowed: allowed == 1,
            count,
            window_start_ms,
        })
    }

    async fn ping(&self) -> Result<(), CounterError> {
        let mut conn = self.connection.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(CounterError::Protocol(format!("unexpected PING reply: {}", reply)))
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
