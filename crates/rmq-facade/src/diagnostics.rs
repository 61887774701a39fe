//! Diagnostic messages emitted by the facades.
//!
//! Diagnostics are delivered to the configured [`DebugHandler`] every time,
//! and additionally logged at debug level when the client runs with
//! `debug = true`.

use crate::config::{ClientConfig, DebugHandler};
use std::fmt;

/// Sink for the facade's diagnostic messages
#[derive(Clone, Default)]
pub struct Diagnostics {
    debug: bool,
    handler: Option<DebugHandler>,
}

impl Diagnostics {
    pub fn new(debug: bool, handler: Option<DebugHandler>) -> Self {
        Self { debug, handler }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.debug, config.debug_handler.clone())
    }

    /// Report a diagnostic message
    pub fn emit(&self, args: fmt::Arguments<'_>) {
        if self.handler.is_none() && !self.debug {
            return;
        }

        let message = args.to_string();
        if let Some(handler) = &self.handler {
            handler(&message);
        }
        if self.debug {
            tracing::debug!(target: "rmq_facade", "{}", message);
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("debug", &self.debug)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

#[cfg(test)]
#[path = "diagnostics_tests.rs"]
mod tests;
