//! Tracing subscriber setup.
//!
//! Logs go to stderr; stdout carries the MCP stdio transport. The filter starts from
//! `RUST_LOG` (or `info`) and is swapped for the configuration file's `log_level` once
//! the file has been read, unless `RUST_LOG` was set.

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

pub struct LogControl {
    handle: reload::Handle<EnvFilter, Registry>,
    env_override: bool,
}

/// Install the global subscriber.
pub fn init_logging() -> LogControl {
    let env_override = std::env::var(EnvFilter::DEFAULT_ENV).is_ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(Level::INFO));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    LogControl {
        handle,
        env_override,
    }
}

fn level_filter(level: Level) -> EnvFilter {
    EnvFilter::default().add_directive(LevelFilter::from_level(level).into())
}

impl LogControl {
    /// Apply the configured level. `RUST_LOG` keeps precedence.
    pub fn apply_config_level(&self, level: Level) {
        if self.env_override {
            return;
        }
        if let Err(e) = self.handle.reload(level_filter(level)) {
            warn!("Failed to apply log level {}: {}", level, e);
        }
    }
}
