use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::service::RecomputeSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub analytics_database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub jwt_secret: Option<String>,
    pub read_timeout_seconds: u64,
    pub write_timeout_seconds: u64,
    pub enforce_classroom_scope: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Local development reads a .env file when present.
        dotenvy::dotenv().ok();

        Ok(Config {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set to a production Postgres instance")?,
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 10)?,
            analytics_database_url: env::var("ANALYTICS_DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("PORT", 8080)?,
            jwt_secret: env::var("JWT_SECRET").ok(),
            read_timeout_seconds: parse_var("READ_TIMEOUT_SECONDS", 10)?,
            write_timeout_seconds: parse_var("WRITE_TIMEOUT_SECONDS", 10)?,
            enforce_classroom_scope: parse_var("ENFORCE_CLASSROOM_SCOPE", true)?,
        })
    }

    /// Secret for validating session tokens; only the HTTP server needs it.
    pub fn require_jwt_secret(&self) -> Result<&str> {
        let secret = self
            .jwt_secret
            .as_deref()
            .context("JWT_SECRET must be set to serve the HTTP trigger")?;
        if secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters long");
        }
        Ok(secret)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn recompute_settings(&self) -> RecomputeSettings {
        RecomputeSettings {
            read_timeout: Duration::from_secs(self.read_timeout_seconds),
            write_timeout: Duration::from_secs(self.write_timeout_seconds),
            enforce_classroom_scope: self.enforce_classroom_scope,
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Failed to parse {name}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: Option<&str>) -> Config {
        Config {
            database_url: "postgres://localhost/classroom".to_string(),
            max_connections: 5,
            analytics_database_url: None,
            host: "127.0.0.1".to_string(),
            port: 9090,
            jwt_secret: secret.map(str::to_string),
            read_timeout_seconds: 3,
            write_timeout_seconds: 7,
            enforce_classroom_scope: false,
        }
    }

    #[test]
    fn jwt_secret_must_be_present_and_long() {
        assert!(config(None).require_jwt_secret().is_err());
        assert!(config(Some("short")).require_jwt_secret().is_err());
        assert!(config(Some("0123456789abcdef0123456789abcdef"))
            .require_jwt_secret()
            .is_ok());
    }

    #[test]
    fn settings_carry_timeouts_and_scope_flag() {
        let cfg = config(None);
        let settings = cfg.recompute_settings();
        assert_eq!(settings.read_timeout, Duration::from_secs(3));
        assert_eq!(settings.write_timeout, Duration::from_secs(7));
        assert!(!settings.enforce_classroom_scope);
        assert_eq!(cfg.server_address(), "127.0.0.1:9090");
    }

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        let value: u64 = parse_var("CLASS_AVERAGES_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }
}
