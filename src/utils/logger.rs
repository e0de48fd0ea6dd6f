//! Log setup for the adapter binary
//!
//! Diagnostics go to stderr; stdout carries the replay summary and
//! `config` output. Dependencies (HTTP client, coordination server) are held
//! at `warn` so the adapter's own delivery lines stay readable.

use tracing_subscriber::EnvFilter;

/// Filter directives for adapter logs, checked before `RUST_LOG`
pub const LOG_ENV: &str = "TMS_ADAPTER_LOG";

/// Verbosity of the adapter's own modules, least to most
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }

    fn directive(self) -> &'static str {
        match self {
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// `directives` from the environment win when they parse
fn filter_for(level: LogLevel, directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(format!("warn,tms_adapter={}", level.directive())))
}

/// Install the global subscriber; later calls leave the first one in place
pub fn init_logger(level: LogLevel) {
    let directives = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok();

    // module paths tell delivery, retry and sync lines apart when debugging
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(level, directives.as_deref()))
        .with_target(level >= LogLevel::Debug)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
