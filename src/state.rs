use crate::auth::{
    repo::{CredentialStore, PgCredentialStore},
    services::AuthService,
    token::TokenService,
};
use crate::config::AppConfig;
use anyhow::Context;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: AuthService,
}

impl AppState {
    /// Loads configuration, connects to Postgres and applies migrations.
    /// Fails when the signing secret or the database URL is missing.
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;

        let store = Arc::new(PgCredentialStore::new(db)) as Arc<dyn CredentialStore>;
        Ok(Self::from_parts(config, store))
    }

    pub fn from_parts(config: Arc<AppConfig>, store: Arc<dyn CredentialStore>) -> Self {
        let tokens = TokenService::new(&config.jwt);
        Self {
            auth: AuthService::new(store, tokens),
            config,
        }
    }

    pub fn with_tokens(config: Arc<AppConfig>, store: Arc<dyn CredentialStore>, tokens: TokenService) -> Self {
        Self {
            auth: AuthService::new(store, tokens),
            config,
        }
    }
}
