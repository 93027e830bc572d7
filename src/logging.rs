//! Unified logging for the build pipeline.
//!
//! Compact timestamped output with per-target level configuration.
//! `RUST_LOG` overrides whatever the config file says.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "warn"
//!
//! [logging.modules]
//! "symdex::cache" = "debug"
//! ```
//!
//! # Environment Variable
//!
//! ```bash
//! RUST_LOG=debug symdex index --repo foo --commit HEAD
//! RUST_LOG=symdex::fetcher=trace symdex search --repo foo --commit HEAD main
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Build the filter directive string from config.
fn filter_directives(config: &LoggingConfig) -> String {
    let mut filter_str = config.default.clone();
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();
    for (module, level) in modules {
        filter_str.push_str(&format!(",{module}={level}"));
    }
    filter_str
}

/// Initialize logging with configuration.
///
/// Call once at startup. Later calls are no-ops. Logs go to stderr so command
/// output on stdout stays machine-readable.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).init();
    });
}

/// Initialize logging with default configuration (`warn`).
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Log an event tagged with the component that produced it.
///
/// # Examples
/// ```ignore
/// log_event!("cache", "promoted", "{}", path.display());
/// log_event!("builder", "full rebuild");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Debug-only event logging.
///
/// # Examples
/// ```ignore
/// debug_event!("fetcher", "skipped", "{path} (binary)");
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives_from_config() {
        let mut config = LoggingConfig::default();
        config
            .modules
            .insert("symdex::cache".to_string(), "debug".to_string());
        config
            .modules
            .insert("symdex::fetcher".to_string(), "trace".to_string());

        assert_eq!(
            filter_directives(&config),
            "warn,symdex::cache=debug,symdex::fetcher=trace"
        );
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init_with_config(&LoggingConfig::default());
    }
}
