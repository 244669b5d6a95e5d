//! Configuration for the Ripple runtime.
//!
//! Loading is layered with figment (see [`loader`]); the schema lives in
//! [`schema`] and semantic checks in [`validation`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    AccessConfig, DispatchConfig, LogFormat, LogOutput, LogRotation, LoggingConfig,
    RippleConfig, SpanEventConfig,
};
pub use validation::validate_config;
