use tracing::subscriber::set_global_default;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

use resque::LogLevel;

/// Maps the `LOGGING` env var onto a bunyan-formatted `tracing` subscriber. `NONE` installs a
/// filter that passes nothing through rather than skipping subscriber setup, so a later
/// `RUST_LOG` override still works.
pub fn configure(name: impl Into<String>, level: LogLevel) {
    LogTracer::builder()
        .with_max_level(log::LevelFilter::Debug)
        .init()
        .expect("failed to install log shim");

    let default_filter = match level {
        LogLevel::None => "off",
        LogLevel::Normal => "info",
        LogLevel::Verbose => "debug",
    };
    let env_filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(default_filter));

    let formatting_layer = BunyanFormattingLayer::new(name.into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer);
    set_global_default(subscriber).expect("failed to install global subscriber");
}
