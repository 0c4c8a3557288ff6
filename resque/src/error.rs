use thiserror::Error;

/// Errors produced anywhere in the queue protocol, job pipeline, or worker loop.
///
/// `DontPerformAbort` from the original Resque design is deliberately absent here: per the
/// handler-skip redesign it is represented as `HookOutcome::Skip`, never raised as an error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),

    #[error("args must be a JSON object, got {0}")]
    InvalidArgument(serde_json::Value),

    #[error("no handler registered for class {0:?}")]
    HandlerNotFound(String),

    #[error("handler for class {class:?} failed: {source}")]
    HandlerError {
        class: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("child for job {job_id} exited dirty: {detail}")]
    DirtyExit { job_id: String, detail: String },

    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),

    #[error("wait failed: {0}")]
    Wait(#[source] nix::Error),

    #[error("signal registration failed: {0}")]
    Signal(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
