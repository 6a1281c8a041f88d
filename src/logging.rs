//! Diagnostic tracing.
//!
//! Output goes to stderr so stdout carries only the conversation.
//! `RUST_LOG` wins when set; otherwise `-v` flags pick the level.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter for a `-v` count: 0 → warn, 1 → info, 2+ → debug.
pub fn default_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Install the global subscriber. Later calls are ignored.
///
/// # Example
/// ```bash
/// RUST_LOG=juliacoder=debug juliacoder
/// ```
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbosity)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
