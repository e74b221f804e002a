use std::str::FromStr;

use crate::error::ConfigError;

/// Read an environment variable, treating unset and blank as `None`.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid UTF-8".to_string(),
        }),
    }
}

/// Read and parse an environment variable.
pub(crate) fn parse_optional_env<T>(key: &str, expected: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| s.parse::<T>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be {expected}: {e}"),
        })
}

/// Reject zero durations and counts where a positive value is required.
pub(crate) fn require_positive(key: &str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be > 0".to_string(),
        });
    }
    Ok(value)
}

/// Validate an http(s) endpoint and strip any trailing slash.
pub(crate) fn validate_endpoint(key: &str, endpoint: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(endpoint).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("URL parse failed: {e}"),
    })?;

    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "URL contains userinfo (@), which is not allowed".to_string(),
        });
    }

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("scheme '{other}' is not allowed (allowed: http, https)"),
            });
        }
    }

    if parsed.host_str().is_none() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "URL is missing host".to_string(),
        });
    }

    Ok(endpoint.trim_end_matches('/').to_string())
}

pub(crate) fn normalize_variant(value: &str) -> String {
    value.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}
