use std::sync::atomic::{AtomicBool, Ordering};

use redis::Commands;

use crate::error::Result;

/// Namespaced wrapper around a synchronous `redis::Connection`.
///
/// A worker `fork()`s between reserving and executing a job (see [`crate::worker`]), so the
/// client must never hand a socket across that boundary: every call checks whether the pid
/// has changed since the connection was opened and, if so, discards it and reconnects.
pub struct RedisClient {
    client: redis::Client,
    conn: Option<redis::Connection>,
    opened_by_pid: u32,
    prefix: String,
    needs_reconnect: AtomicBool,
}

impl RedisClient {
    pub fn open(url: &str, namespace: &str) -> Result<RedisClient> {
        let client = redis::Client::open(url)?;
        let prefix = if namespace.ends_with(':') {
            namespace.to_string()
        } else {
            format!("{}:", namespace)
        };

        Ok(RedisClient {
            client,
            conn: None,
            opened_by_pid: 0,
            prefix,
            needs_reconnect: AtomicBool::new(false),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key(&self, name: impl AsRef<str>) -> String {
        format!("{}{}", self.prefix, name.as_ref())
    }

    /// Called from the worker's `PIPE` signal handler discipline: rather than reconnecting
    /// inside the handler itself, the handler only sets this flag and the main loop calls
    /// `reconnect` between suspension points.
    pub fn mark_needs_reconnect(&self) {
        self.needs_reconnect.store(true, Ordering::SeqCst);
    }

    pub fn take_needs_reconnect(&self) -> bool {
        self.needs_reconnect.swap(false, Ordering::SeqCst)
    }

    pub fn reconnect(&mut self) -> Result<()> {
        self.conn = None;
        self.ensure_connection()
    }

    fn ensure_connection(&mut self) -> Result<&mut redis::Connection> {
        let current_pid = std::process::id();
        if self.conn.is_none() || self.opened_by_pid != current_pid {
            self.conn = Some(self.client.get_connection()?);
            self.opened_by_pid = current_pid;
        }
        Ok(self.conn.as_mut().unwrap())
    }

    pub fn sadd(&mut self, key: &str, member: &str) -> Result<()> {
        let key = self.key(key);
        self.ensure_connection()?.sadd(key, member)?;
        Ok(())
    }

    pub fn srem(&mut self, key: &str, member: &str) -> Result<()> {
        let key = self.key(key);
        self.ensure_connection()?.srem(key, member)?;
        Ok(())
    }

    pub fn sismember(&mut self, key: &str, member: &str) -> Result<bool> {
        let key = self.key(key);
        Ok(self.ensure_connection()?.sismember(key, member)?)
    }

    pub fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        let key = self.key(key);
        Ok(self.ensure_connection()?.smembers(key)?)
    }

    pub fn rpush(&mut self, key: &str, value: &str) -> Result<()> {
        let key = self.key(key);
        self.ensure_connection()?.rpush(key, value)?;
        Ok(())
    }

    pub fn lpop(&mut self, key: &str) -> Result<Option<String>> {
        let key = self.key(key);
        Ok(self.ensure_connection()?.lpop(key, None)?)
    }

    pub fn llen(&mut self, key: &str) -> Result<i64> {
        let key = self.key(key);
        Ok(self.ensure_connection()?.llen(key)?)
    }

    pub fn rpoplpush(&mut self, src: &str, dst: &str) -> Result<Option<String>> {
        let src = self.key(src);
        let dst = self.key(dst);
        Ok(self.ensure_connection()?.rpoplpush(src, dst)?)
    }

    pub fn rpop(&mut self, key: &str) -> Result<Option<String>> {
        let key = self.key(key);
        Ok(self.ensure_connection()?.rpop(key, None)?)
    }

    pub fn del(&mut self, key: &str) -> Result<()> {
        let key = self.key(key);
        self.ensure_connection()?.del(key)?;
        Ok(())
    }

    pub fn get(&mut self, key: &str) -> Result<Option<String>> {
        let key = self.key(key);
        Ok(self.ensure_connection()?.get(key)?)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let key = self.key(key);
        self.ensure_connection()?.set(key, value)?;
        Ok(())
    }

    pub fn setex(&mut self, key: &str, seconds: usize, value: &str) -> Result<()> {
        let key = self.key(key);
        self.ensure_connection()?.set_ex(key, value, seconds)?;
        Ok(())
    }

    pub fn incrby(&mut self, key: &str, by: i64) -> Result<i64> {
        let key = self.key(key);
        Ok(self.ensure_connection()?.incr(key, by)?)
    }

    pub fn decrby(&mut self, key: &str, by: i64) -> Result<i64> {
        let key = self.key(key);
        Ok(self.ensure_connection()?.decr(key, by)?)
    }

    pub fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<()> {
        let key = self.key(key);
        self.ensure_connection()?.hset(key, field, value)?;
        Ok(())
    }

    pub fn hget(&mut self, key: &str, field: &str) -> Result<Option<String>> {
        let key = self.key(key);
        Ok(self.ensure_connection()?.hget(key, field)?)
    }

    pub fn hdel(&mut self, key: &str, field: &str) -> Result<()> {
        let key = self.key(key);
        self.ensure_connection()?.hdel(key, field)?;
        Ok(())
    }

    /// Deletes every key matching `prefix<glob>`. Test-only cleanup helper, grounded in the
    /// teacher's `run_queue_test` SCAN-and-delete pattern.
    #[cfg(any(test, feature = "test-redis"))]
    pub fn scan_delete(&mut self, glob: &str) -> Result<()> {
        let pattern = self.key(glob);
        let conn = self.ensure_connection()?;
        let keys: Vec<String> = conn.scan_match(pattern)?.collect();
        for key in keys {
            conn.del::<_, ()>(key)?;
        }
        Ok(())
    }
}
