use serde_json::Value;

use crate::context::Resque;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::events::{Event, HookOutcome};
use crate::queue::QueueStore;
use crate::status::{StatusCode, StatusTracker};

/// A reserved or about-to-be-enqueued job: the queue it lives on plus its envelope.
///
/// Mirrors the original `Resque::Job`'s split between construction (`create`/`reserve`) and
/// execution (`perform`/`fail`) — both paths produce the same type so the worker loop doesn't
/// need to juggle two job representations.
#[derive(Debug, Clone)]
pub struct Job {
    pub queue: String,
    pub payload: Envelope,
}

impl Job {
    /// Pushes a new envelope onto `queue`. Reuses `args.id` as the job's identity when
    /// present, treating the enqueue as a *recreation*; otherwise mints a fresh id.
    ///
    /// When `track_status` is set: a brand-new id gets a fresh WAITING record; a recreated id
    /// that was already tracked has its existing record reset to WAITING rather than getting a
    /// second one.
    pub fn create(
        resque: &Resque,
        queue: &str,
        class: &str,
        args: Option<Value>,
        track_status: bool,
    ) -> Result<String> {
        // Reusing `args.id` as the job's identity means `id` must not also survive into the
        // stored `args[0]` — otherwise a recreate of this envelope reads the same `id` back out
        // of its own args and never actually mints a fresh identity. Mirrors the original's
        // `unset(args['id'])` after consuming it.
        let mut args = args;
        let explicit_id = match &mut args {
            Some(Value::Object(map)) => map.remove("id").and_then(|v| v.as_str().map(String::from)),
            _ => None,
        };
        let is_recreation = explicit_id.is_some();
        let envelope = Envelope::new(class, args, explicit_id)?;

        let mut client = resque.client.borrow_mut();
        QueueStore::push(&mut client, queue, &envelope)?;

        if track_status {
            let already_tracked = is_recreation && StatusTracker::is_tracking(&mut client, &envelope.id)?;
            if already_tracked {
                StatusTracker::update(&mut client, &envelope.id, StatusCode::Waiting)?;
            } else {
                StatusTracker::create(&mut client, &envelope.id)?;
            }
        }
        drop(client);

        resque.events.trigger(Event::AfterEnqueue {
            class,
            args: envelope.arguments().unwrap_or(&Value::Null),
            queue,
        })?;

        Ok(envelope.id)
    }

    /// Pops the next envelope off `queue`, FIFO. At most one worker ever sees a given
    /// envelope, by virtue of `lpop` being single-key atomic.
    pub fn reserve(resque: &Resque, queue: &str) -> Result<Option<Job>> {
        let mut client = resque.client.borrow_mut();
        match QueueStore::pop(&mut client, queue)? {
            Some(payload) => Ok(Some(Job {
                queue: queue.to_string(),
                payload,
            })),
            None => Ok(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.payload.id
    }

    pub fn class(&self) -> &str {
        &self.payload.class
    }

    pub fn arguments(&self) -> Option<&Value> {
        self.payload.arguments()
    }

    /// Runs the handler pipeline: `beforePerform` → `setUp` → `perform` → `tearDown` →
    /// `afterPerform`. A `HookOutcome::Skip` from either hook short-circuits before the
    /// handler runs and before `afterPerform` fires; `perform` then returns `Ok(false)`
    /// without touching stats (the job is cleanly skipped, not failed).
    ///
    /// Any other error is wrapped as `Error::HandlerError` and left for the caller (the
    /// worker loop) to hand to `fail`.
    pub fn perform(&self, resque: &Resque) -> Result<bool> {
        let args = self.arguments().cloned().unwrap_or(Value::Null);

        if resque.events.trigger(Event::BeforePerform { job: self })? == HookOutcome::Skip {
            return Ok(false);
        }

        let mut handler = resque
            .handlers
            .resolve(self.class())
            .ok_or_else(|| Error::HandlerNotFound(self.class().to_string()))?;

        let set_up = handler.set_up(&args).map_err(|source| Error::HandlerError {
            class: self.class().to_string(),
            source,
        })?;
        if set_up == HookOutcome::Skip {
            return Ok(false);
        }

        handler.perform(&args).map_err(|source| Error::HandlerError {
            class: self.class().to_string(),
            source,
        })?;

        handler.tear_down(&args).map_err(|source| Error::HandlerError {
            class: self.class().to_string(),
            source,
        })?;

        resque.events.trigger(Event::AfterPerform { job: self })?;

        Ok(true)
    }

    /// Records a failure: fires `onFailure`, marks the status FAILED, persists the
    /// failure envelope via the configured sink, and bumps both the global and per-worker
    /// `failed` counters.
    pub fn fail(&self, resque: &Resque, worker_id: &str, exception: &str, message: &str, backtrace: &[String]) -> Result<()> {
        resque.events.trigger(Event::OnFailure {
            error: &message,
            job: self,
        })?;

        let mut client = resque.client.borrow_mut();
        StatusTracker::update(&mut client, self.id(), StatusCode::Failed)?;
        resque.failures.create(
            &mut client,
            &self.payload,
            exception,
            message,
            backtrace,
            worker_id,
            &self.queue,
        )?;
        crate::stat::Stat::incr(&mut client, "failed", 1)?;
        crate::stat::Stat::incr(&mut client, &format!("failed:{}", worker_id), 1)?;
        Ok(())
    }

    /// Republishes the same `class`/`args` onto the same queue under a fresh id. If
    /// the original id was tracked, tracking is re-established on the new id rather than
    /// carried over — the old status record is left to expire on its own TTL.
    pub fn recreate(&self, resque: &Resque) -> Result<String> {
        let was_tracked = StatusTracker::is_tracking(&mut resque.client.borrow_mut(), self.id())?;
        Job::create(
            resque,
            &self.queue,
            self.class(),
            self.arguments().cloned(),
            was_tracked,
        )
    }

    pub fn status(&self, resque: &Resque) -> Result<Option<StatusCode>> {
        StatusTracker::get(&mut resque.client.borrow_mut(), self.id())
    }

    pub fn update_status(&self, resque: &Resque, status: StatusCode) -> Result<()> {
        StatusTracker::update(&mut resque.client.borrow_mut(), self.id(), status)
    }
}
