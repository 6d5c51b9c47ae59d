//! Logging setup
//!
//! Console output by default, optionally a daily-rotated file under the
//! platform log directory, and JSON lines when requested.

use std::path::PathBuf;

use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Filter override, e.g. `debug` or `info,immersive_hap_relay::pool=trace`
pub const LOG_ENV: &str = "HAP_RELAY_LOG";
/// Set to `json` for JSON lines on the console
pub const LOG_FORMAT_ENV: &str = "HAP_RELAY_LOG_FORMAT";

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub console_enabled: bool,
    pub file_enabled: bool,
    /// Directory for rotated log files; platform data dir when `None`
    pub file_dir: Option<PathBuf>,
    pub json_format: bool,
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enabled: true,
            file_enabled: false,
            file_dir: None,
            json_format: false,
            default_level: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// Where rotated files go when file logging is on
    pub fn resolved_file_dir(&self) -> PathBuf {
        self.file_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("hap-relay")
                .join("logs")
        })
    }
}

/// Install the global subscriber
///
/// The returned guard flushes the file writer on drop; hold it for the life
/// of the process. `HAP_RELAY_LOG` (then `RUST_LOG`) overrides the level.
pub fn init_logging(config: &LogConfig) -> Result<Option<LogGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let use_json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(config.json_format);

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let mut file_guard = None;

    let file_layer = if config.file_enabled {
        let dir = config.resolved_file_dir();
        std::fs::create_dir_all(&dir)?;
        let appender = tracing_appender::rolling::daily(&dir, "hap-relay.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);
        eprintln!("Logging to {}", dir.display());

        Some(
            fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false),
        )
    } else {
        None
    };

    let (json_layer, console_layer) = match (config.console_enabled, use_json) {
        (true, true) => (
            Some(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true),
            ),
            None,
        ),
        (true, false) => (
            None,
            Some(fmt::layer().with_target(true).with_thread_names(true).compact()),
        ),
        (false, _) => (None, None),
    };

    subscriber
        .with(file_layer)
        .with(json_layer)
        .with(console_layer)
        .try_init()?;

    tracing::info!(
        target: "immersive_hap_relay",
        version = env!("CARGO_PKG_VERSION"),
        json_format = use_json,
        file_enabled = config.file_enabled,
        "Logging initialized"
    );

    Ok(file_guard)
}

pub use tracing_appender::non_blocking::WorkerGuard as LogGuard;
