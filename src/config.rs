//! Environment variable helpers shared by the `from_env` constructors.

use std::env;
use std::str::FromStr;

use crate::domain::ConfigError;

/// Parse `name` from the environment, falling back to `default` when unset or blank
pub fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    name: name.to_string(),
                    value,
                })
        }
        _ => Ok(default),
    }
}

/// Read a boolean switch (`true`/`1`/`yes` or `false`/`0`/`no`)
pub fn env_flag(name: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                name: name.to_string(),
                value,
            }),
        },
        _ => Ok(default),
    }
}
