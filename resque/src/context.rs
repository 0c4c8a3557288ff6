use std::cell::RefCell;

use crate::client::RedisClient;
use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use crate::failure::{FailureSink, RedisFailureSink};
use crate::handler::HandlerRegistry;

/// Owns the three pieces of what would otherwise be global, process-wide state: the Redis
/// wrapper, the event bus, and the selected failure backend. Constructed once
/// (`Resque::open`) and handed by reference to every `Job` and `Worker`, per the Design
/// Notes' "explicit runtime context" redesign — this is what lets tests build fully isolated
/// instances against distinct key prefixes instead of mutating process-wide state.
pub struct Resque {
    pub client: RefCell<RedisClient>,
    pub events: EventBus,
    pub failures: Box<dyn FailureSink>,
    pub handlers: HandlerRegistry,
}

impl Resque {
    pub fn open(config: &Config) -> Result<Resque> {
        let client = RedisClient::open(&config.redis_url, &config.namespace)?;
        Ok(Resque {
            client: RefCell::new(client),
            events: EventBus::new(),
            failures: Box::new(RedisFailureSink),
            handlers: HandlerRegistry::new(),
        })
    }

    /// Builds a context around an already-open client, for tests that want a specific
    /// randomized namespace without going through environment variables.
    pub fn with_client(client: RedisClient) -> Resque {
        Resque {
            client: RefCell::new(client),
            events: EventBus::new(),
            failures: Box::new(RedisFailureSink),
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn set_failure_sink(&mut self, sink: Box<dyn FailureSink>) {
        self.failures = sink;
    }
}
