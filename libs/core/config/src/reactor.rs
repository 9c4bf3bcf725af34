//! Reactor tuning loaded from the environment.
//!
//! | variable                       | default |
//! |--------------------------------|---------|
//! | `REACTOR_RECONNECT_TIMEOUT_MS` | 5000    |
//! | `REACTOR_BACKOFF_THRESHOLD`    | 15      |
//! | `REACTOR_BACKOFF_BASE_MS`      | 600     |
//! | `REACTOR_BACKOFF_MAX_MS`       | 60000   |
//! | `REACTOR_STOP_TIMEOUT_MS`      | 30000   |

use crate::{ConfigError, FromEnv, env_parse};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactorSettings {
    pub reconnect_timeout_ms: u64,
    pub backoff_threshold: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub stop_timeout_ms: u64,
}

impl Default for ReactorSettings {
    fn default() -> Self {
        Self {
            reconnect_timeout_ms: 5_000,
            backoff_threshold: 15,
            backoff_base_ms: 600,
            backoff_max_ms: 60_000,
            stop_timeout_ms: 30_000,
        }
    }
}

impl FromEnv for ReactorSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let settings = Self {
            reconnect_timeout_ms: env_parse(
                "REACTOR_RECONNECT_TIMEOUT_MS",
                defaults.reconnect_timeout_ms,
            )?,
            backoff_threshold: env_parse("REACTOR_BACKOFF_THRESHOLD", defaults.backoff_threshold)?,
            backoff_base_ms: env_parse("REACTOR_BACKOFF_BASE_MS", defaults.backoff_base_ms)?,
            backoff_max_ms: env_parse("REACTOR_BACKOFF_MAX_MS", defaults.backoff_max_ms)?,
            stop_timeout_ms: env_parse("REACTOR_STOP_TIMEOUT_MS", defaults.stop_timeout_ms)?,
        };

        if settings.backoff_base_ms > settings.backoff_max_ms {
            return Err(ConfigError::ParseError {
                key: "REACTOR_BACKOFF_BASE_MS".to_string(),
                details: format!(
                    "base delay {}ms exceeds max delay {}ms",
                    settings.backoff_base_ms, settings.backoff_max_ms
                ),
            });
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 5] = [
        "REACTOR_RECONNECT_TIMEOUT_MS",
        "REACTOR_BACKOFF_THRESHOLD",
        "REACTOR_BACKOFF_BASE_MS",
        "REACTOR_BACKOFF_MAX_MS",
        "REACTOR_STOP_TIMEOUT_MS",
    ];

    #[test]
    fn test_defaults_when_unset() {
        temp_env::with_vars_unset(VARS, || {
            let settings = ReactorSettings::from_env().unwrap();
            assert_eq!(settings, ReactorSettings::default());
        });
    }

    #[test]
    fn test_overrides() {
        temp_env::with_vars(
            [
                ("REACTOR_RECONNECT_TIMEOUT_MS", Some("250")),
                ("REACTOR_BACKOFF_THRESHOLD", Some("3")),
                ("REACTOR_BACKOFF_BASE_MS", Some("100")),
                ("REACTOR_BACKOFF_MAX_MS", Some("2000")),
                ("REACTOR_STOP_TIMEOUT_MS", None),
            ],
            || {
                let settings = ReactorSettings::from_env().unwrap();
                assert_eq!(settings.reconnect_timeout_ms, 250);
                assert_eq!(settings.backoff_threshold, 3);
                assert_eq!(settings.backoff_base_ms, 100);
                assert_eq!(settings.backoff_max_ms, 2000);
                assert_eq!(settings.stop_timeout_ms, 30_000);
            },
        );
    }

    #[test]
    fn test_malformed_number() {
        temp_env::with_var("REACTOR_BACKOFF_THRESHOLD", Some("fifteen"), || {
            let err = ReactorSettings::from_env().unwrap_err();
            assert!(err.to_string().contains("REACTOR_BACKOFF_THRESHOLD"));
        });
    }

    #[test]
    fn test_base_above_max_is_rejected() {
        temp_env::with_vars(
            [
                ("REACTOR_BACKOFF_BASE_MS", Some("5000")),
                ("REACTOR_BACKOFF_MAX_MS", Some("1000")),
            ],
            || {
                assert!(ReactorSettings::from_env().is_err());
            },
        );
    }
}
