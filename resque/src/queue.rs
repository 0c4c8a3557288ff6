use crate::client::RedisClient;
use crate::envelope::{Envelope, MatchItem};
use crate::error::Result;

const QUEUES_SET: &str = "queues";

fn queue_key(name: &str) -> String {
    format!("queue:{}", name)
}

/// Push/pop/size/selective-remove over per-queue lists (`queue:<name>`). All operations are
/// free functions over a borrowed [`RedisClient`] rather than methods on a stored connection,
/// since the client itself owns the only live socket and may be reopened across a fork.
pub struct QueueStore;

impl QueueStore {
    pub fn push(client: &mut RedisClient, queue: &str, envelope: &Envelope) -> Result<()> {
        client.sadd(QUEUES_SET, queue)?;
        let raw = envelope.to_json()?;
        client.rpush(&queue_key(queue), &raw)
    }

    pub fn pop(client: &mut RedisClient, queue: &str) -> Result<Option<Envelope>> {
        match client.lpop(&queue_key(queue))? {
            Some(raw) => Ok(Some(Envelope::from_json(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn size(client: &mut RedisClient, queue: &str) -> Result<i64> {
        client.llen(&queue_key(queue))
    }

    pub fn queues(client: &mut RedisClient) -> Result<Vec<String>> {
        client.smembers(QUEUES_SET)
    }

    /// Selective removal. With an empty `items`, atomically drops the whole list and returns
    /// its previous length. Otherwise runs a drain/restore rotation algorithm that tolerates
    /// concurrent pushes onto the tail but is not safe against a second
    /// concurrent `dequeue` on the same queue (operators must serialize those externally).
    pub fn dequeue(client: &mut RedisClient, queue: &str, items: &[MatchItem]) -> Result<i64> {
        let q = queue_key(queue);

        if items.is_empty() {
            let len = client.llen(&q)?;
            client.del(&q)?;
            return Ok(len);
        }

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let temp = format!("{}:temp:{}", q, now);
        let requeue = format!("{}:requeue", temp);

        let mut removed = 0i64;

        // Drain phase: rotate every element through `temp`, discarding matches and shuffling
        // survivors into `requeue` to preserve their relative order.
        loop {
            let moved = client.rpoplpush(&q, &temp)?;
            let raw = match moved {
                Some(raw) => raw,
                None => break,
            };

            let matched = match Envelope::from_json(&raw) {
                Ok(envelope) => items.iter().any(|item| item.matches(&envelope)),
                Err(_) => false,
            };

            if matched {
                client.rpop(&temp)?;
                removed += 1;
            } else {
                client.rpoplpush(&temp, &requeue)?;
            }
        }

        // Restore phase: move survivors back onto the original queue.
        while client.rpoplpush(&requeue, &q)?.is_some() {}

        client.del(&requeue)?;
        client.del(&temp)?;

        Ok(removed)
    }
}
