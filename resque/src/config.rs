use std::env;

/// How verbosely the worker logs, mapped onto a `tracing` `EnvFilter` level by the CLI
/// launcher. The core crate only needs to know the requested level; `tracing` initialization
/// itself lives in `resque-cli`, keeping the library logging-framework-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    None,
    Normal,
    Verbose,
}

impl LogLevel {
    pub fn parse(s: &str) -> LogLevel {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => LogLevel::None,
            "VERBOSE" => LogLevel::Verbose,
            _ => LogLevel::Normal,
        }
    }
}

/// Host-supplied Redis connection parameters. `redis_url` accepts whatever `redis::Client`
/// accepts: `redis://host:port`, `redis+unix:///path`, etc. Cluster arrays are out of scope —
/// this crate targets a single Redis server.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub namespace: String,
    pub queues: QueueSpec,
    pub interval: u64,
    pub logging: LogLevel,
}

/// The queue list a worker was configured with: an explicit priority-ordered list, or the
/// wildcard `*` which is re-resolved from the `queues` set on every poll.
#[derive(Debug, Clone)]
pub enum QueueSpec {
    Named(Vec<String>),
    Wildcard,
}

impl QueueSpec {
    pub fn parse(raw: &str) -> QueueSpec {
        if raw.trim() == "*" {
            QueueSpec::Wildcard
        } else {
            QueueSpec::Named(raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        }
    }

    /// The CSV form used in the worker identity string `<host>:<pid>:<queues-csv>`.
    pub fn as_csv(&self) -> String {
        match self {
            QueueSpec::Named(names) => names.join(","),
            QueueSpec::Wildcard => "*".to_string(),
        }
    }
}

impl Config {
    /// Populates a `Config` from environment variables: `env::var` reads plus typed defaults.
    pub fn from_env() -> Config {
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let namespace = env::var("REDIS_NAMESPACE")
            .or_else(|_| env::var("PREFIX"))
            .unwrap_or_else(|_| "resque".to_string());
        let queues = env::var("QUEUE")
            .ok()
            .as_deref()
            .map(QueueSpec::parse)
            .unwrap_or(QueueSpec::Wildcard);
        let interval = env::var("INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        let logging = env::var("LOGGING")
            .ok()
            .map(|v| LogLevel::parse(&v))
            .unwrap_or(LogLevel::Normal);

        Config {
            redis_url,
            namespace,
            queues,
            interval,
            logging,
        }
    }
}
