//! A Redis-backed background job queue and worker runtime, wire-compatible with the
//! original Resque key layout: producers enqueue a named job class onto a named queue, and a
//! [`Worker`] polls, reserves, and runs jobs in a forked child, isolated from the parent
//! process.

pub mod client;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod events;
pub mod failure;
pub mod handler;
pub mod job;
pub mod queue;
pub mod stat;
pub mod status;
pub mod worker;

pub use client::RedisClient;
pub use config::{Config, LogLevel, QueueSpec};
pub use context::Resque;
pub use envelope::{Envelope, MatchItem};
pub use error::{Error, Result};
pub use events::{Event, EventBus, HookOutcome, ListenerId};
pub use failure::FailureSink;
pub use handler::{HandlerRegistry, JobHandler};
pub use job::Job;
pub use queue::QueueStore;
pub use stat::Stat;
pub use status::{StatusCode, StatusTracker};
pub use worker::Worker;
