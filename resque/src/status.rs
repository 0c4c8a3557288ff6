use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::client::RedisClient;
use crate::error::Result;

/// Bounds how long a status tombstone survives after the job finishes, and how long a
/// WAITING record can sit untouched. Refreshed on every `update`, not just on `create`.
const STATUS_TTL_SECS: usize = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum StatusCode {
    Waiting = 1,
    Running = 2,
    Failed = 3,
    Complete = 4,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusRecord {
    status: StatusCode,
    updated: i64,
    started: i64,
}

/// Per-job lifecycle state stored at `job:<id>:status`, absence meaning "not tracked" or
/// "expired". Tracking is opt-in per job (`trackStatus` at create time).
pub struct StatusTracker;

impl StatusTracker {
    fn key(id: &str) -> String {
        format!("job:{}:status", id)
    }

    pub fn create(client: &mut RedisClient, id: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        let record = StatusRecord {
            status: StatusCode::Waiting,
            updated: now,
            started: now,
        };
        client.setex(&Self::key(id), STATUS_TTL_SECS, &serde_json::to_string(&record)?)
    }

    pub fn update(client: &mut RedisClient, id: &str, status: StatusCode) -> Result<()> {
        let started = match Self::read(client, id)? {
            Some(existing) => existing.started,
            None => Utc::now().timestamp(),
        };
        let record = StatusRecord {
            status,
            updated: Utc::now().timestamp(),
            started,
        };
        client.setex(&Self::key(id), STATUS_TTL_SECS, &serde_json::to_string(&record)?)
    }

    pub fn get(client: &mut RedisClient, id: &str) -> Result<Option<StatusCode>> {
        Ok(Self::read(client, id)?.map(|r| r.status))
    }

    pub fn is_tracking(client: &mut RedisClient, id: &str) -> Result<bool> {
        Ok(client.get(&Self::key(id))?.is_some())
    }

    pub fn stop(client: &mut RedisClient, id: &str) -> Result<()> {
        client.del(&Self::key(id))
    }

    fn read(client: &mut RedisClient, id: &str) -> Result<Option<StatusRecord>> {
        match client.get(&Self::key(id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}
