//! Client configuration shared by producers and consumers.
//!
//! A [`ClientConfig`] can be built in code or loaded with [`ClientConfig::load`],
//! which layers an optional configuration file under environment variables
//! prefixed `RMQ__` (double-underscore separator, e.g. `RMQ__LOG__STDOUT=true`).

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Callback receiving every diagnostic message, whether or not debug output is on
pub type DebugHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Connection and behaviour settings for a broker client
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Broker proxy endpoint, e.g. `127.0.0.1:8081`
    pub endpoint: String,

    /// Namespace shared by producers and consumers
    pub namespace: String,

    /// Consumer group, required for consumers only
    #[serde(default)]
    pub consumer_group: String,

    /// Credentials for authenticated endpoints
    #[serde(default)]
    pub credentials: Option<Credentials>,

    #[serde(default)]
    pub log: LogConfig,

    /// Emit this crate's diagnostic messages as debug log events
    #[serde(default)]
    pub debug: bool,

    /// Flow coloring; `None` disables it
    #[serde(default)]
    pub flow_color: Option<FlowColorConfig>,

    #[serde(skip)]
    pub debug_handler: Option<DebugHandler>,
}

impl ClientConfig {
    /// Create configuration for an endpoint and namespace
    pub fn new(endpoint: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            namespace: namespace.into(),
            consumer_group: String::new(),
            credentials: None,
            log: LogConfig::default(),
            debug: false,
            flow_color: None,
            debug_handler: None,
        }
    }

    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = group.into();
        self
    }

    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        access_secret: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials::new(access_key, access_secret));
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_debug_handler(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.debug_handler = Some(Arc::new(handler));
        self
    }

    /// Enable flow coloring with the given color
    ///
    /// `base` marks the base environment, whose consumers also receive
    /// messages that carry no color.
    pub fn with_flow_color(mut self, color: impl Into<String>, base: bool) -> Self {
        self.flow_color = Some(FlowColorConfig {
            color: color.into(),
            base,
        });
        self
    }

    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Check required connection settings
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "endpoint".to_string(),
            });
        }

        if self.namespace.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "namespace".to_string(),
            });
        }

        if let Some(credentials) = &self.credentials {
            if credentials.access_key.trim().is_empty() != credentials.access_secret.is_empty() {
                return Err(ConfigurationError::Invalid {
                    message: "access_key and access_secret must be set together".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Load configuration from an optional file plus `RMQ__` environment variables
    ///
    /// The file format is inferred from the extension (YAML, TOML or JSON).
    /// The result is validated before it is returned.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("RMQ")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        let config: ClientConfig =
            settings
                .try_deserialize()
                .map_err(|e| ConfigurationError::Parsing {
                    message: e.to_string(),
                })?;

        config.validate()?;
        Ok(config)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("namespace", &self.namespace)
            .field("consumer_group", &self.consumer_group)
            .field("credentials", &self.credentials)
            .field("log", &self.log)
            .field("debug", &self.debug)
            .field("flow_color", &self.flow_color)
            .field("debug_handler", &self.debug_handler.is_some())
            .finish()
    }
}

/// Access key pair for authenticated endpoints
///
/// The secret is wiped from memory when the value is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub access_key: String,
    pub access_secret: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, access_secret: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            access_secret: access_secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("access_secret", &"<redacted>")
            .finish()
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory for the log file when `stdout` is off
    #[serde(default = "default_log_path")]
    pub path: PathBuf,

    /// Write to the terminal instead of a log file
    #[serde(default)]
    pub stdout: bool,

    /// Use JSON formatted log lines
    #[serde(default)]
    pub json: bool,
}

fn default_log_path() -> PathBuf {
    PathBuf::from("/tmp")
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            stdout: false,
            json: false,
        }
    }
}

/// Flow coloring settings
///
/// On a producer, `color` is stamped on every outgoing message. On a
/// consumer, subscriptions are narrowed to messages carrying `color`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowColorConfig {
    pub color: String,

    /// Base environments also match uncolored messages
    #[serde(default)]
    pub base: bool,
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
