//! One-time structured logging setup.
//!
//! The teacher's Cargo.toml already declared `tracing`/`tracing-subscriber`
//! but its `lib.rs` never called into them; this wires that up for real.

use crate::config::LoggingConfig;

pub fn init(config: &LoggingConfig) {
    let level = config.level.as_deref().unwrap_or("info");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}
