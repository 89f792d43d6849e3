use std::{env, fmt::Display, str::FromStr, time::Duration};

use tracing::{info, warn};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is required when {reason}")]
    Missing { key: &'static str, reason: &'static str },
    #[error("invalid {key} value {value:?}: {message}")]
    Invalid {
        key: &'static str,
        value: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirebaseConfig {
    pub api_key: String,
    pub project_id: String,
    pub storage_bucket: String,
    /// OAuth token for server-side Firestore access; without it requests are
    /// made as the signed-in user.
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// In-process services. Optionally seeds one admin account.
    Memory { seed_admin: Option<(String, String)> },
    Firebase(FirebaseConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    /// Overrides the cargo-leptos site address when set.
    pub port: Option<u16>,
    pub backend: BackendConfig,
    pub poll_interval: Duration,
    pub assistant: Option<AssistantConfig>,
}

impl PortalConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = match var("PORT") {
            Some(value) => Some(parse("PORT", &value)?),
            None => None,
        };
        let poll_secs: u64 = try_load(&var, "PORTAL_POLL_SECS", "5")?;

        let backend = match var("PORTAL_BACKEND").as_deref().unwrap_or("memory") {
            "memory" => BackendConfig::Memory {
                seed_admin: var("PORTAL_SEED_ADMIN")
                    .map(|value| match value.split_once(':') {
                        Some((email, password)) => Ok((email.to_string(), password.to_string())),
                        None => Err(ConfigError::Invalid {
                            key: "PORTAL_SEED_ADMIN",
                            value: value.clone(),
                            message: "expected email:password".into(),
                        }),
                    })
                    .transpose()?,
            },
            "firebase" => {
                let required = |key: &'static str| {
                    var(key).ok_or(ConfigError::Missing {
                        key,
                        reason: "PORTAL_BACKEND=firebase",
                    })
                };
                BackendConfig::Firebase(FirebaseConfig {
                    api_key: required("FIREBASE_API_KEY")?,
                    project_id: required("FIREBASE_PROJECT_ID")?,
                    storage_bucket: required("FIREBASE_STORAGE_BUCKET")?,
                    access_token: var("FIREBASE_ACCESS_TOKEN"),
                })
            }
            other => {
                return Err(ConfigError::Invalid {
                    key: "PORTAL_BACKEND",
                    value: other.to_string(),
                    message: "expected memory or firebase".into(),
                })
            }
        };

        let assistant = match (var("ASSISTANT_ENDPOINT"), var("ASSISTANT_API_KEY")) {
            (Some(endpoint), Some(api_key)) => Some(AssistantConfig {
                endpoint,
                api_key,
                model: var("ASSISTANT_MODEL").unwrap_or_else(|| "gpt-3.5-turbo".into()),
            }),
            _ => {
                info!("ASSISTANT_ENDPOINT or ASSISTANT_API_KEY not set, assistant disabled");
                None
            }
        };

        Ok(Self {
            port,
            backend,
            poll_interval: Duration::from_secs(poll_secs.max(1)),
            assistant,
        })
    }
}

fn try_load<T: FromStr>(
    var: impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    parse(key, &value)
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key,
            value: value.to_string(),
            message: e.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<PortalConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PortalConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_memory_backend() {
        let config = load(&[]).unwrap();

        assert_eq!(config.backend, BackendConfig::Memory { seed_admin: None });
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.port, None);
        assert_eq!(config.assistant, None);
    }

    #[test]
    fn firebase_needs_its_keys() {
        let err = load(&[
            ("PORTAL_BACKEND", "firebase"),
            ("FIREBASE_API_KEY", "k"),
        ])
        .unwrap_err();

        assert_eq!(
            err,
            ConfigError::Missing {
                key: "FIREBASE_PROJECT_ID",
                reason: "PORTAL_BACKEND=firebase"
            }
        );
    }

    #[test]
    fn firebase_config_is_read() {
        let config = load(&[
            ("PORTAL_BACKEND", "firebase"),
            ("FIREBASE_API_KEY", "k"),
            ("FIREBASE_PROJECT_ID", "campus"),
            ("FIREBASE_STORAGE_BUCKET", "campus.appspot.com"),
            ("PORT", "8080"),
        ])
        .unwrap();

        assert_eq!(config.port, Some(8080));
        assert!(matches!(
            config.backend,
            BackendConfig::Firebase(FirebaseConfig { access_token: None, .. })
        ));
    }

    #[test]
    fn seed_admin_is_email_and_password() {
        let config = load(&[("PORTAL_SEED_ADMIN", "admin@vbithyd.ac.in:secret1")]).unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Memory {
                seed_admin: Some(("admin@vbithyd.ac.in".into(), "secret1".into()))
            }
        );

        assert!(load(&[("PORTAL_SEED_ADMIN", "no-colon")]).is_err());
    }

    #[test]
    fn bad_numbers_are_reported() {
        assert!(matches!(
            load(&[("PORTAL_POLL_SECS", "soon")]),
            Err(ConfigError::Invalid { key: "PORTAL_POLL_SECS", .. })
        ));
    }
}
