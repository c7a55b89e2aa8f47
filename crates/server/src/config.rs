//! Runtime configuration read from the environment.

use std::{net::SocketAddr, time::Duration};

use secrecy::SecretString;
use services::services::email::{EmailProviderKind, Sender};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: SecretString,
    pub host: String,
    pub port: u16,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
    pub email_provider: EmailProviderKind,
    pub email_api_key: Option<SecretString>,
    pub email_from: String,
    pub email_from_name: Option<String>,
    pub campaign_poll_interval: Duration,
    pub campaign_batch_size: i64,
    pub anthropic_api_key: Option<SecretString>,
    pub support_ai_model: Option<String>,
    pub sentry_dsn: Option<String>,
    pub environment: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            database_max_connections: parse_positive("DATABASE_MAX_CONNECTIONS", get("DATABASE_MAX_CONNECTIONS"), 10)?,
            jwt_secret: SecretString::from(required("SUPABASE_JWT_SECRET")?),
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or("PORT", get("PORT"), 3001)?,
            cors_origins: get("CORS_ORIGINS")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            email_provider: parse_or("EMAIL_PROVIDER", get("EMAIL_PROVIDER"), EmailProviderKind::Log)?,
            email_api_key: get("EMAIL_API_KEY").map(SecretString::from),
            email_from: get("EMAIL_FROM").unwrap_or_else(|| "no-reply@czi.local".to_string()),
            email_from_name: get("EMAIL_FROM_NAME"),
            campaign_poll_interval: Duration::from_secs(parse_positive(
                "CAMPAIGN_POLL_SECONDS",
                get("CAMPAIGN_POLL_SECONDS"),
                30u64,
            )?),
            campaign_batch_size: parse_positive("CAMPAIGN_BATCH_SIZE", get("CAMPAIGN_BATCH_SIZE"), 50)?,
            anthropic_api_key: get("ANTHROPIC_API_KEY").map(SecretString::from),
            support_ai_model: get("SUPPORT_AI_MODEL"),
            sentry_dsn: get("SENTRY_DSN"),
            environment: get("APP_ENV").unwrap_or_else(|| "development".to_string()),
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::Invalid {
                key: "HOST",
                value: self.host.clone(),
            })
    }

    pub fn email_sender(&self) -> Sender {
        Sender {
            email: self.email_from.clone(),
            name: self.email_from_name.clone(),
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

/// Like `parse_or`, but zero and negative values are invalid.
fn parse_positive<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + From<u8>,
{
    let parsed = parse_or(key, value.clone(), default)?;
    if parsed < T::from(1) {
        return Err(ConfigError::Invalid {
            key,
            value: value.unwrap_or_default(),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost/czi"),
        ("SUPABASE_JWT_SECRET", "secret"),
    ];

    #[test]
    fn defaults_apply() {
        let config = config(&REQUIRED).unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.email_provider, EmailProviderKind::Log);
        assert_eq!(config.campaign_poll_interval, Duration::from_secs(30));
        assert_eq!(config.campaign_batch_size, 50);
        assert!(config.cors_origins.is_empty());
        assert!(config.anthropic_api_key.is_none());
        assert_eq!(config.jwt_secret.expose_secret(), "secret");
    }

    #[test]
    fn missing_required_key() {
        let err = config(&REQUIRED[..1]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SUPABASE_JWT_SECRET")));
    }

    #[test]
    fn parses_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("PORT", "8080"),
            ("EMAIL_PROVIDER", "Brevo"),
            ("CORS_ORIGINS", "https://czi.example, http://localhost:3000,"),
            ("ANTHROPIC_API_KEY", "  "),
        ]);
        let config = config(&vars).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.email_provider, EmailProviderKind::Brevo);
        assert_eq!(
            config.cors_origins,
            vec!["https://czi.example", "http://localhost:3000"]
        );
        assert!(config.anthropic_api_key.is_none());
        assert_eq!(config.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn rejects_bad_numbers() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("CAMPAIGN_BATCH_SIZE", "lots"));
        assert!(matches!(
            config(&vars),
            Err(ConfigError::Invalid {
                key: "CAMPAIGN_BATCH_SIZE",
                ..
            })
        ));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("CAMPAIGN_POLL_SECONDS", "0"));
        assert!(matches!(
            config(&vars),
            Err(ConfigError::Invalid {
                key: "CAMPAIGN_POLL_SECONDS",
                ..
            })
        ));
    }

    #[test]
    fn rejects_non_positive_sizes() {
        for (key, value) in [
            ("CAMPAIGN_BATCH_SIZE", "0"),
            ("CAMPAIGN_BATCH_SIZE", "-5"),
            ("DATABASE_MAX_CONNECTIONS", "0"),
        ] {
            let mut vars = REQUIRED.to_vec();
            vars.push((key, value));
            match config(&vars) {
                Err(ConfigError::Invalid { key: k, .. }) => assert_eq!(k, key),
                other => panic!("{key}={value} accepted: {other:?}"),
            }
        }
    }
}
