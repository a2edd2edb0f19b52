//! Logging setup
//!
//! The harness logs through `tracing`. [`init_tracing`] installs a registry with
//! an `EnvFilter` (overridable via `RUST_LOG`) and a fmt layer, either
//! human-readable or JSON for CI log collectors.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,maestro_e2e=debug,kube=info,tower=warn,hyper=warn";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber is already installed
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Output options for [`init_tracing`]
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Emit one JSON object per event instead of plain text
    pub json: bool,
    /// Filter directives; `None` reads `RUST_LOG`, then [`DEFAULT_FILTER`]
    pub filter: Option<String>,
}

impl TelemetryConfig {
    fn env_filter(&self) -> EnvFilter {
        match &self.filter {
            Some(directives) => EnvFilter::new(directives),
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Fails if a subscriber is already installed; [`try_init_tracing`] ignores that.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))
}

/// Install the default subscriber unless one is already installed
pub fn try_init_tracing() {
    let _ = init_tracing(&TelemetryConfig::default());
}
