//! `tracing` subscriber setup.
//!
//! `RUST_LOG` overrides `[logging] level`. Human output only uses ANSI
//! colours when stderr is a terminal; JSON output is one object per line.
//! Logs go to stderr so `rh status` / `rh report` output on stdout stays
//! parseable.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global subscriber. Calling it twice is harmless (the second call is a no-op).
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow::anyhow!("invalid logging.level '{}': {}", config.level, e))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder
            .with_ansi(atty::is(atty::Stream::Stderr))
            .try_init()
    };
    // Already installed (tests, embedded use).
    let _ = result;
    Ok(())
}
