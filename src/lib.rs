pub mod bridge;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod processor;
pub mod record;
pub mod registry;
pub mod rotation_job;
pub mod storage;
pub mod trace;

pub use config::ConfigError;
pub use context::{ContextProvider, RuntimeContext, StaticContext};
pub use dispatch::{DispatchReport, Dispatcher, EventLogger, PendingEvent};
pub use error::{Error, Result, StorageError};
pub use record::{Channel, ComponentClass, EventRecord, Level, TraceRecord};
pub use registry::{HandlerConfig, LoggerDefinition, LoggerDraft, LoggerRegistry};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// `format` is `json` for structured output, anything else for text.
/// `RUST_LOG` takes precedence over `default_level`. Can only be called once.
pub fn init_tracing(format: &str, default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

/// Like [`init_tracing`], with host events also forwarded to fanlog loggers.
///
/// The filter only applies to console output; the bridge applies its own
/// minimum level.
pub fn init_tracing_with_bridge(format: &str, default_level: &str, bridge: bridge::BridgeLayer) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(bridge);
    if format == "json" {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .with_filter(filter),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .with_filter(filter),
            )
            .init();
    }
}
