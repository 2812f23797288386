use std::{env, fmt::Display, str::FromStr};

use chrono::Duration;
use progress_core::model::UserId;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid {key} value `{value}`: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("no {0} verifier configured")]
    MissingVerifier(&'static str),
}

/// Upper bound for `PROGRESS_MIN_INTERVAL_SECS`: one day.
pub const MAX_MIN_INTERVAL_SECS: i64 = 24 * 60 * 60;

/// Runtime configuration for the progress server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_url: String,
    pub require_attestation: bool,
    pub min_interval_secs: i64,
    pub identity_url: Option<String>,
    pub attestation_url: Option<String>,
    /// `token=uid` pairs for the static identity verifier.
    pub dev_tokens: Vec<(String, UserId)>,
    pub dev_attestation_tokens: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5001,
            db_url: "sqlite://progress.sqlite3".into(),
            require_attestation: true,
            min_interval_secs: 10,
            identity_url: None,
            attestation_url: None,
            dev_tokens: Vec::new(),
            dev_attestation_tokens: Vec::new(),
        }
    }
}

impl Config {
    /// Load from `PROGRESS_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load using an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a variable is set but cannot be parsed
    /// or is out of range.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            host: var("PROGRESS_HOST").unwrap_or(defaults.host),
            port: try_load(&var, "PROGRESS_PORT", defaults.port)?,
            db_url: var("PROGRESS_DB_URL").unwrap_or(defaults.db_url),
            require_attestation: try_load(
                &var,
                "PROGRESS_REQUIRE_ATTESTATION",
                defaults.require_attestation,
            )?,
            min_interval_secs: try_load(
                &var,
                "PROGRESS_MIN_INTERVAL_SECS",
                defaults.min_interval_secs,
            )?,
            identity_url: var("PROGRESS_IDENTITY_URL"),
            attestation_url: var("PROGRESS_ATTESTATION_URL"),
            dev_tokens: var("PROGRESS_DEV_TOKENS")
                .map(|raw| parse_token_pairs(&raw))
                .transpose()?
                .unwrap_or_default(),
            dev_attestation_tokens: var("PROGRESS_DEV_ATTESTATION_TOKENS")
                .map(|raw| split_list(&raw).map(str::to_owned).collect())
                .unwrap_or_default(),
        };
        config.min_interval()?;
        Ok(config)
    }

    /// Cooldown between accepted writes for one user.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` unless `min_interval_secs` lies in
    /// `0..=MAX_MIN_INTERVAL_SECS`.
    pub fn min_interval(&self) -> Result<Duration, ConfigError> {
        let secs = self.min_interval_secs;
        let invalid = || ConfigError::Invalid {
            key: "PROGRESS_MIN_INTERVAL_SECS",
            value: secs.to_string(),
            reason: format!("must be between 0 and {MAX_MIN_INTERVAL_SECS}"),
        };
        if !(0..=MAX_MIN_INTERVAL_SECS).contains(&secs) {
            return Err(invalid());
        }
        Duration::try_seconds(secs).ok_or_else(invalid)
    }

    /// Switch to local development: attestation becomes optional.
    #[must_use]
    pub fn into_development(mut self) -> Self {
        self.require_attestation = false;
        self
    }

    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn try_load<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = var(key) else {
        info!("{key} not set, using default: {default}");
        return Ok(default);
    };
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|item| !item.is_empty())
}

fn parse_token_pairs(raw: &str) -> Result<Vec<(String, UserId)>, ConfigError> {
    split_list(raw)
        .map(|pair| {
            let invalid = |reason: &str| ConfigError::Invalid {
                key: "PROGRESS_DEV_TOKENS",
                value: pair.to_owned(),
                reason: reason.to_owned(),
            };
            let (token, uid) = pair
                .split_once('=')
                .ok_or_else(|| invalid("expected token=uid"))?;
            let token = token.trim();
            if token.is_empty() {
                return Err(invalid("empty token"));
            }
            let uid = UserId::new(uid).map_err(|e| invalid(&e.to_string()))?;
            Ok((token.to_owned(), uid))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(load(&[]).unwrap(), Config::default());
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("PROGRESS_PORT", "8080"),
            ("PROGRESS_REQUIRE_ATTESTATION", "false"),
            ("PROGRESS_MIN_INTERVAL_SECS", "30"),
            ("PROGRESS_DEV_TOKENS", "t1=alice, t2=bob"),
            ("PROGRESS_DEV_ATTESTATION_TOKENS", "a,,b"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert!(!config.require_attestation);
        assert_eq!(config.min_interval_secs, 30);
        assert_eq!(config.dev_tokens.len(), 2);
        assert_eq!(config.dev_tokens[1].1.as_str(), "bob");
        assert_eq!(config.dev_attestation_tokens, ["a", "b"]);
        assert_eq!(config.address(), "0.0.0.0:8080");
    }

    #[test]
    fn rejects_unparseable_values() {
        assert!(matches!(
            load(&[("PROGRESS_PORT", "eighty")]),
            Err(ConfigError::Invalid {
                key: "PROGRESS_PORT",
                ..
            })
        ));
        assert!(load(&[("PROGRESS_DEV_TOKENS", "no-separator")]).is_err());
        assert!(load(&[("PROGRESS_DEV_TOKENS", "t=")]).is_err());
    }

    #[test]
    fn min_interval_must_be_within_bounds() {
        for raw in ["-100", "9223372036854775807", "86401"] {
            assert!(
                matches!(
                    load(&[("PROGRESS_MIN_INTERVAL_SECS", raw)]),
                    Err(ConfigError::Invalid {
                        key: "PROGRESS_MIN_INTERVAL_SECS",
                        ..
                    })
                ),
                "{raw} should be rejected"
            );
        }

        let config = load(&[("PROGRESS_MIN_INTERVAL_SECS", "0")]).unwrap();
        assert_eq!(config.min_interval(), Ok(Duration::zero()));
        let config = load(&[("PROGRESS_MIN_INTERVAL_SECS", "86400")]).unwrap();
        assert_eq!(config.min_interval(), Ok(Duration::days(1)));
    }

    #[test]
    fn hand_built_config_with_huge_interval_is_an_error() {
        let config = Config {
            min_interval_secs: i64::MAX,
            ..Config::default()
        };
        assert!(config.min_interval().is_err());
    }

    #[test]
    fn development_relaxes_attestation() {
        assert!(!Config::default().into_development().require_attestation);
    }
}
