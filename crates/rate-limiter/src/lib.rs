use shared::{AppError, RedisClient};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Lua script implementing a fixed-window counter with a block period.
/// KEYS[1] = counter key, KEYS[2] = block key.
/// ARGV[1] = points, ARGV[2] = duration seconds, ARGV[3] = block duration seconds.
/// Returns {allowed (0/1), seconds_before_next}.
const CONSUME_SCRIPT: &str = r#"
local blocked_ttl = redis.call('TTL', KEYS[2])
if blocked_ttl and blocked_ttl > 0 then
    return {0, blocked_ttl}
end

local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end

if count > tonumber(ARGV[1]) then
    redis.call('SET', KEYS[2], '1', 'EX', ARGV[3])
    return {0, tonumber(ARGV[3])}
end

local ttl = redis.call('TTL', KEYS[1])
if ttl < 0 then
    ttl = tonumber(ARGV[2])
end
return {1, ttl}
"#;

struct MemoryWindow {
    count: u32,
    window_start: Instant,
    blocked_until: Option<Instant>,
}

/// Per-user sliding window limiter: ≤ `points` calls to `consume` per
/// `duration`, then a `block_duration` cooldown before the window resets.
/// Redis-backed when available; falls back to an in-process counter map so
/// deployment requests still get limited when Redis is down.
pub struct RateLimiter {
    redis: Option<RedisClient>,
    key_prefix: String,
    points: u32,
    duration: Duration,
    block_duration: Duration,
    memory: Mutex<HashMap<String, MemoryWindow>>,
}

impl RateLimiter {
    pub fn new(redis: Option<RedisClient>, key_prefix: &str, points: u32, duration_secs: u64, block_duration_secs: u64) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.to_string(),
            points,
            duration: Duration::from_secs(duration_secs),
            block_duration: Duration::from_secs(block_duration_secs),
            memory: Mutex::new(HashMap::new()),
        }
    }

    pub fn uses_redis(&self) -> bool {
        self.redis.is_some()
    }

    pub async fn consume(&self, key: &str) -> Result<(), AppError> {
        if let Some(redis) = &self.redis {
            if redis.is_connected() {
                return self.consume_redis(redis, key).await;
            }
            warn!(key, "redis unavailable for rate limiting, falling back to memory");
        }
        self.consume_memory(key)
    }

    async fn consume_redis(&self, redis: &RedisClient, key: &str) -> Result<(), AppError> {
        let counter_key = format!("{}:{}", self.key_prefix, key);
        let block_key = format!("{}:{}:blocked", self.key_prefix, key);
        let points = self.points;
        let duration_secs = self.duration.as_secs();
        let block_secs = self.block_duration.as_secs();

        let (allowed, seconds_before_next): (i64, i64) = redis
            .execute(move |mut conn| {
                let counter_key = counter_key.clone();
                let block_key = block_key.clone();
                async move {
                    redis::Script::new(CONSUME_SCRIPT)
                        .key(counter_key)
                        .key(block_key)
                        .arg(points)
                        .arg(duration_secs)
                        .arg(block_secs)
                        .invoke_async(&mut conn)
                        .await
                }
            })
            .await?;

        if allowed == 1 {
            Ok(())
        } else {
            Err(AppError::RateLimited { retry_after_seconds: seconds_before_next as f64 })
        }
    }

    fn consume_memory(&self, key: &str) -> Result<(), AppError> {
        let now = Instant::now();
        let mut memory = self.memory.lock().expect("rate limiter memory lock poisoned");
        let window = memory.entry(key.to_string()).or_insert_with(|| MemoryWindow {
            count: 0,
            window_start: now,
            blocked_until: None,
        });

        if let Some(blocked_until) = window.blocked_until {
            if now < blocked_until {
                let remaining = (blocked_until - now).as_secs_f64();
                return Err(AppError::RateLimited { retry_after_seconds: remaining });
            }
            window.blocked_until = None;
            window.count = 0;
            window.window_start = now;
        }

        if now.duration_since(window.window_start) >= self.duration {
            window.count = 0;
            window.window_start = now;
        }

        window.count += 1;
        if window.count > self.points {
            window.blocked_until = Some(now + self.block_duration);
            return Err(AppError::RateLimited { retry_after_seconds: self.block_duration.as_secs_f64() });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_limiter_blocks_after_points_exceeded() {
        let limiter = RateLimiter::new(None, "test_rl", 2, 60, 120);
        assert!(limiter.consume_memory("user-1").is_ok());
        assert!(limiter.consume_memory("user-1").is_ok());
        let result = limiter.consume_memory("user-1");
        assert!(matches!(result, Err(AppError::RateLimited { .. })));
    }

    #[test]
    fn memory_limiter_tracks_keys_independently() {
        let limiter = RateLimiter::new(None, "test_rl", 1, 60, 120);
        assert!(limiter.consume_memory("user-a").is_ok());
        assert!(limiter.consume_memory("user-b").is_ok());
    }
}
