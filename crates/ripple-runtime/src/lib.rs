//! Ripple Runtime - configuration, logging and the event loop.
//!
//! This crate provides:
//! - Layered configuration loading (`config`)
//! - Subscriber setup for `tracing` (`logging`)
//! - The [`ChannelResponder`] action egress
//! - The [`Runtime`] that ingests frames, dispatches events and shuts down
//!   gracefully
//!
//! The runtime is transport-agnostic: inbound frames arrive as JSON text on a
//! channel (or through [`Runtime::ingest`]) and outbound action frames leave on
//! another one.

pub mod config;
pub mod error;
pub mod logging;
pub mod responder;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, RippleConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use responder::ChannelResponder;
pub use runtime::{Runtime, RuntimeBuilder};

pub use tracing;
pub use tracing_subscriber;

/// Logging macros.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
