use std::env;

use tracing::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const SVC_LABEL_ENVVAR: &str = "FEDPEG_SVC_LABEL";

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    whoami: String,
    default_filter: String,
}

impl LoggerConfig {
    /// Creates a new instance with whoami set.
    pub fn new(whoami: String) -> Self {
        Self {
            whoami,
            default_filter: DEFAULT_FILTER.to_owned(),
        }
    }

    pub fn with_base_name(s: &str) -> Self {
        Self::new(get_whoami_string(s))
    }

    /// Directives applied when `RUST_LOG` is unset, e.g. `"fedpeg_transfer_store=debug"`.
    pub fn set_default_filter(&mut self, filter: impl Into<String>) {
        self.default_filter = filter.into();
    }

    pub fn whoami(&self) -> &str {
        &self.whoami
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::with_base_name("(fedpeg-service)")
    }
}

/// Initializes the logging subsystem with the provided config.
///
/// Logging can only be initialized once per process, later calls only emit a warning.
pub fn init(config: LoggerConfig) {
    let filt = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    // Stdout logging.
    let stdout_sub = tracing_subscriber::fmt::layer().compact().with_filter(filt);

    if let Err(e) = tracing_subscriber::registry().with(stdout_sub).try_init() {
        warn!(%e, "logging already initialized");
        return;
    }

    info!(whoami = %config.whoami, "logging started");
}

/// Shuts down the logging subsystem.
pub fn finalize() {
    info!("shutting down logging");
}

/// Gets the service label from the standard envvar, which should be included
/// in the whoami string.
pub fn get_service_label_from_env() -> Option<String> {
    env::var(SVC_LABEL_ENVVAR).ok()
}

/// Computes a standard whoami string.
pub fn get_whoami_string(base: &str) -> String {
    match get_service_label_from_env() {
        Some(label) => format!("{base}%{label}"),
        None => base.to_owned(),
    }
}
