//! # Structured Logging Module
//!
//! Environment-aware structured logging for debugging complex async
//! orchestration flows. Console output by default, JSON when requested.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process.
///
/// Filter comes from `CONDUCTOR_LOG` (default `info`); set
/// `CONDUCTOR_LOG_FORMAT=json` for machine-readable output. Uses `try_init`
/// so embedders that already installed a subscriber keep theirs.
pub fn init() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_env("CONDUCTOR_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let json_output = std::env::var("CONDUCTOR_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let result = if json_output {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true))
                .try_init()
        };

        if result.is_err() {
            tracing::debug!("global tracing subscriber already installed, keeping it");
        }
    });
}
