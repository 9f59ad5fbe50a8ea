use anyhow::{bail, Context};
use serde::Deserialize;

/// Default session horizon: 7 days.
pub const DEFAULT_TTL_MINUTES: i64 = 60 * 24 * 7;
/// Upper bound for the session horizon: 10 years.
pub const MAX_TTL_MINUTES: i64 = 60 * 24 * 365 * 10;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Cookie names the edge gate looks for, one per session scope.
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    pub user_cookie: String,
    pub admin_cookie: String,
    pub secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub cookies: CookieConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. `DATABASE_URL` and `JWT_SECRET`
    /// are mandatory; there is no fallback secret.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;

        let secret = lookup("JWT_SECRET").context("JWT_SECRET must be set")?;
        if secret.trim().is_empty() {
            bail!("JWT_SECRET must not be empty");
        }

        let ttl_minutes = match lookup("JWT_TTL_MINUTES") {
            Some(raw) => raw
                .parse::<i64>()
                .with_context(|| format!("JWT_TTL_MINUTES is not a number: {raw}"))?,
            None => DEFAULT_TTL_MINUTES,
        };
        if ttl_minutes <= 0 {
            bail!("JWT_TTL_MINUTES must be positive");
        }
        if ttl_minutes > MAX_TTL_MINUTES {
            bail!("JWT_TTL_MINUTES must not exceed {MAX_TTL_MINUTES}");
        }

        let jwt = JwtConfig {
            secret,
            issuer: lookup("JWT_ISSUER").unwrap_or_else(|| "formations".into()),
            audience: lookup("JWT_AUDIENCE").unwrap_or_else(|| "formations-users".into()),
            ttl_minutes,
        };

        let cookies = CookieConfig {
            user_cookie: lookup("USER_COOKIE_NAME").unwrap_or_else(|| "user_token".into()),
            admin_cookie: lookup("ADMIN_COOKIE_NAME").unwrap_or_else(|| "admin_token".into()),
            secure: lookup("COOKIE_SECURE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        };

        Ok(Self {
            database_url,
            jwt,
            cookies,
        })
    }
}
