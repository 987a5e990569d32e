//! Logging setup.
//!
//! The crate logs through `tracing` and never installs a subscriber on its
//! own. Applications that have no subscriber of their own can call
//! [`init`] once at startup (requires the `tracing-subscriber` feature).
//!
//! # Environment Variables
//!
//! - `HYBRID_DB_DEBUG=true|1|yes` - Enable debug logging
//! - `HYBRID_DB_LOG_LEVEL=trace|debug|info|warn|error` - Set a specific level
//! - `HYBRID_DB_LOG_FORMAT=json|pretty|compact` - Output format (default: json)
//!
//! Nothing is installed unless debug logging or a level was requested.
//!
//! # Usage
//!
//! ```rust,no_run
//! use hybrid_db::logging;
//!
//! logging::init();
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

const DEBUG_VAR: &str = "HYBRID_DB_DEBUG";
const LEVEL_VAR: &str = "HYBRID_DB_LOG_LEVEL";
const FORMAT_VAR: &str = "HYBRID_DB_LOG_FORMAT";

/// Check if debug logging is enabled via `HYBRID_DB_DEBUG`.
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var(DEBUG_VAR).is_ok_and(|v| debug_flag(&v))
}

/// The configured log level.
///
/// `HYBRID_DB_LOG_LEVEL` wins when it names a known level; otherwise "debug"
/// if debug logging is enabled, else "warn".
pub fn get_log_level() -> &'static str {
    log_level(env::var(LEVEL_VAR).ok().as_deref(), is_debug_enabled())
}

/// The configured output format. Defaults to "json".
pub fn get_log_format() -> &'static str {
    log_format(env::var(FORMAT_VAR).ok().as_deref())
}

/// Install a global subscriber according to the environment.
///
/// Subsequent calls are no-ops, as are calls without the
/// `tracing-subscriber` feature.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var(LEVEL_VAR).is_err() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = get_log_level();
            let filter = EnvFilter::try_new(format!("hybrid_db={}", level))
                .unwrap_or_else(|_| EnvFilter::new("warn"));

            // A subscriber installed elsewhere takes precedence.
            let installed = match get_log_format() {
                "json" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .try_init(),
                "compact" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().compact())
                    .try_init(),
                _ => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().pretty())
                    .try_init(),
            };

            if installed.is_ok() {
                tracing::info!(level = level, format = get_log_format(), "Logging initialized");
            }
        }
    });
}

fn debug_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

fn log_level(requested: Option<&str>, debug: bool) -> &'static str {
    let fallback = if debug { "debug" } else { "warn" };
    match requested.map(|l| l.trim().to_lowercase()).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("info") => "info",
        Some("warn") => "warn",
        Some("error") => "error",
        _ => fallback,
    }
}

fn log_format(requested: Option<&str>) -> &'static str {
    match requested.map(|f| f.trim().to_lowercase()).as_deref() {
        Some("pretty") => "pretty",
        Some("compact") => "compact",
        _ => "json",
    }
}
