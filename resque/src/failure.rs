use chrono::Utc;
use serde::Serialize;

use crate::client::RedisClient;
use crate::envelope::Envelope;
use crate::error::Result;

/// Persisted post-mortem of a failed job, written to `failed:<id>` with a 14-day TTL.
const FAILURE_TTL_SECS: usize = 14 * 24 * 60 * 60;

#[derive(Debug, Serialize)]
struct FailureEnvelope<'a> {
    failed_at: String,
    payload: &'a Envelope,
    exception: &'a str,
    error: &'a str,
    backtrace: &'a [String],
    worker: &'a str,
    queue: &'a str,
}

/// Pluggable backend that persists failed-job envelopes. Hosts may swap in another
/// implementation (e.g. one that forwards to a log pipeline) without touching the rest of
/// the core.
pub trait FailureSink {
    fn create(
        &self,
        client: &mut RedisClient,
        payload: &Envelope,
        exception: &str,
        error: &str,
        backtrace: &[String],
        worker: &str,
        queue: &str,
    ) -> Result<()>;
}

/// The default backend: writes the envelope directly to Redis.
pub struct RedisFailureSink;

impl FailureSink for RedisFailureSink {
    fn create(
        &self,
        client: &mut RedisClient,
        payload: &Envelope,
        exception: &str,
        error: &str,
        backtrace: &[String],
        worker: &str,
        queue: &str,
    ) -> Result<()> {
        let envelope = FailureEnvelope {
            failed_at: Utc::now().to_rfc2822(),
            payload,
            exception,
            error,
            backtrace,
            worker,
            queue,
        };
        let raw = serde_json::to_string(&envelope)?;
        client.setex(&format!("failed:{}", payload.id), FAILURE_TTL_SECS, &raw)
    }
}
