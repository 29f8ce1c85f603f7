//! Tracing setup for labflow pipelines.
//!
//! The control layer emits structured events at stage boundaries,
//! correlation polls, and conflict forks; this module wires those events
//! into a `tracing-subscriber` stack configured from the environment.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Configuration for the tracing subscriber.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Emit events as JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_filter: "labflow=info".to_string(),
            json: false,
        }
    }
}

impl TracingConfig {
    /// Creates the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fallback filter directive.
    #[must_use]
    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    /// Switches to JSON output.
    #[must_use]
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }
}

/// Installs the global tracing subscriber.
///
/// Idempotent: returns `false` when a subscriber is already installed
/// (common in tests), `true` when this call installed one.
pub fn init_tracing(config: &TracingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::new()
            .with_default_filter("labflow=debug")
            .with_json();
        assert_eq!(config.default_filter, "labflow=debug");
        assert!(config.json);
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = TracingConfig::default();
        // Whatever the first call returns, the second cannot install again.
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
