//! API server configuration
//!
//! All configuration comes in through the environment, is validated once at
//! startup, and is carried as an explicit value from there on. No module in
//! this crate reads environment variables at request time.

use anyhow::Context;

/// Server configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub jwt_secret: String,
    /// Demo mode relaxes startup credential checks for local evaluation.
    /// It never fabricates subscription state: entitlements still resolve
    /// through the regular loader and its fail-open-to-free policy.
    pub demo_mode: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let demo_mode = std::env::var("KARVICO_DEMO_MODE")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let jwt_secret = match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ if demo_mode => {
                tracing::warn!("JWT_SECRET not set, using demo secret (KARVICO_DEMO_MODE=true)");
                "karvico-demo-secret".to_string()
            }
            _ => anyhow::bail!("JWT_SECRET must be set (or enable KARVICO_DEMO_MODE)"),
        };

        Ok(Self {
            database_url,
            bind_address,
            jwt_secret,
            demo_mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "DATABASE_URL",
            "BIND_ADDRESS",
            "JWT_SECRET",
            "KARVICO_DEMO_MODE",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn missing_database_url_is_an_error() {
        clear_env();
        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn missing_jwt_secret_fails_outside_demo_mode() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/karvico");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
        clear_env();
    }

    #[test]
    #[serial]
    fn demo_mode_substitutes_a_jwt_secret() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/karvico");
        std::env::set_var("KARVICO_DEMO_MODE", "true");
        let config = Config::from_env().unwrap();
        assert!(config.demo_mode);
        assert!(!config.jwt_secret.is_empty());
        clear_env();
    }

    #[test]
    #[serial]
    fn bind_address_has_a_default() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/karvico");
        std::env::set_var("JWT_SECRET", "secret");
        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        clear_env();
    }
}
