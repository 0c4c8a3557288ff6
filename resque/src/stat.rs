use crate::client::RedisClient;
use crate::error::Result;

/// Monotonic counters keyed by name, stored directly as Redis integers under `stat:<name>`.
/// No local caching: every call round-trips to Redis.
pub struct Stat;

impl Stat {
    fn key(name: &str) -> String {
        format!("stat:{}", name)
    }

    pub fn get(client: &mut RedisClient, name: &str) -> Result<i64> {
        let key = Self::key(name);
        Ok(client.get(&key)?.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    pub fn incr(client: &mut RedisClient, name: &str, by: i64) -> Result<i64> {
        client.incrby(&Self::key(name), by)
    }

    pub fn decr(client: &mut RedisClient, name: &str, by: i64) -> Result<i64> {
        client.decrby(&Self::key(name), by)
    }

    pub fn clear(client: &mut RedisClient, name: &str) -> Result<()> {
        client.del(&Self::key(name))
    }
}
