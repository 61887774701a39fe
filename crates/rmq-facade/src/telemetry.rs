//! Logging setup for applications embedding the facade.
//!
//! The library itself only emits `tracing` events. Binaries call
//! [`init_logging`] once at startup with the [`LogConfig`] from their
//! [`ClientConfig`](crate::ClientConfig); nothing is read from process-wide
//! environment state except the standard `RUST_LOG` filter override.

use crate::config::LogConfig;
use crate::error::ConfigurationError;
use std::fs::{self, OpenOptions};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log file name created under [`LogConfig::path`]
pub const LOG_FILE_NAME: &str = "rmq-facade.log";

/// Install the global tracing subscriber
///
/// Writes to stdout when `log.stdout` is set, otherwise appends to
/// `<log.path>/rmq-facade.log`. `debug` lowers the default filter to debug
/// level so diagnostic messages become visible.
pub fn init_logging(log: &LogConfig, debug: bool) -> Result<(), ConfigurationError> {
    let default_directive = if debug {
        "rmq_facade=debug,rmq_facade_demo=debug"
    } else {
        "rmq_facade=info,rmq_facade_demo=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let result = if log.stdout {
        if log.json {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()
        }
    } else {
        fs::create_dir_all(&log.path).map_err(|e| ConfigurationError::Invalid {
            message: format!("cannot create log directory {}: {}", log.path.display(), e),
        })?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log.path.join(LOG_FILE_NAME))
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("cannot open log file in {}: {}", log.path.display(), e),
            })?;
        let writer = Mutex::new(file);

        if log.json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .try_init()
        }
    };

    result.map_err(|e| ConfigurationError::Invalid {
        message: format!("logging already initialized: {}", e),
    })
}
