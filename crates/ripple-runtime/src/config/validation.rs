//! Configuration validation utilities.

use std::collections::HashSet;

use super::error::{ConfigError, ConfigResult};
use super::schema::{AccessConfig, DispatchConfig, LogOutput, LoggingConfig, RippleConfig};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validates the entire configuration.
pub fn validate_config(config: &RippleConfig) -> ConfigResult<()> {
    validate_logging(&config.logging)?;
    validate_dispatch(&config.dispatch)?;
    validate_access(&config.access)?;
    Ok(())
}

fn validate_level(level: &str) -> ConfigResult<()> {
    if LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(ConfigError::validation(format!(
            "Invalid log level: {level}. Valid values are: {LOG_LEVELS:?}"
        )))
    }
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    validate_level(&logging.level)?;
    for level in logging.filters.values() {
        validate_level(level)?;
    }
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "File output requires logging.file_path",
        ));
    }
    Ok(())
}

fn validate_dispatch(dispatch: &DispatchConfig) -> ConfigResult<()> {
    if dispatch.dispatch_timeout_ms == Some(0) {
        return Err(ConfigError::validation(
            "Dispatch timeout must be greater than 0",
        ));
    }
    if dispatch.response_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "Response timeout must be greater than 0",
        ));
    }
    if dispatch.max_in_flight == 0 {
        return Err(ConfigError::validation(
            "max_in_flight must be greater than 0",
        ));
    }
    if dispatch.outbound_capacity == 0 {
        return Err(ConfigError::validation(
            "outbound_capacity must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_access(access: &AccessConfig) -> ConfigResult<()> {
    let black: HashSet<_> = access.black_users.iter().collect();
    let privileged = access
        .owner
        .iter()
        .chain(&access.super_users)
        .chain(&access.white_users);
    for id in privileged {
        if black.contains(id) {
            return Err(ConfigError::validation(format!(
                "User {id} is both privileged and blacklisted"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&RippleConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = RippleConfig::default();
        config.logging.level = "loud".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = RippleConfig::default();
        config
            .logging
            .filters
            .insert("ripple_framework".to_string(), "verbose".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = RippleConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());
        config.logging.file_path = Some("logs/ripple.log".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_limits() {
        let mut config = RippleConfig::default();
        config.dispatch.max_in_flight = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));

        let mut config = RippleConfig::default();
        config.dispatch.response_timeout_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = RippleConfig::default();
        config.dispatch.dispatch_timeout_ms = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_blacklisted_privileged_user() {
        let mut config = RippleConfig::default();
        config.access.white_users = vec![1, 2];
        config.access.black_users = vec![3];
        assert!(validate_config(&config).is_ok());

        config.access.owner = Some(3);
        assert!(validate_config(&config).is_err());
    }
}
