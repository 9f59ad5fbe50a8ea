#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request, Response, StatusCode},
    Router,
};
use formations::{
    auth::{
        claims::Role, dto::PublicUser, memory::MemoryCredentialStore, repo::CredentialStore,
        token::TokenService,
    },
    build_app,
    config::AppConfig,
    AppState,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::util::ServiceExt;

pub const PASSWORD: &str = "secret123";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryCredentialStore>,
}

pub fn test_config() -> AppConfig {
    AppConfig::from_lookup(|key| match key {
        "DATABASE_URL" => Some("postgres://unused/formations".into()),
        "JWT_SECRET" => Some("integration-secret".into()),
        _ => None,
    })
    .expect("test config")
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::build(Some(ttl))
    }

    fn build(ttl: Option<Duration>) -> Self {
        let config = Arc::new(test_config());
        let store = Arc::new(MemoryCredentialStore::new());
        let mut tokens = TokenService::new(&config.jwt);
        if let Some(ttl) = ttl {
            tokens = tokens.with_ttl(ttl);
        }
        let state = AppState::with_tokens(
            config,
            store.clone() as Arc<dyn CredentialStore>,
            tokens,
        );
        Self {
            router: build_app(state.clone()),
            state,
            store,
        }
    }

    pub async fn seed_user(&self, email: &str, role: Role) -> PublicUser {
        self.state
            .auth
            .provision_user(email, PASSWORD, None, role)
            .await
            .expect("seed user")
    }

    pub async fn token_for(&self, email: &str) -> String {
        let (_, token) = self
            .state
            .auth
            .login(email, PASSWORD)
            .await
            .expect("login seeded user");
        token
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.expect("router call")
    }
}

pub fn json_request(method: &str, uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

pub fn empty_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("request")
}

pub async fn body_json(resp: Response<Body>) -> Value {
    let bytes = resp
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

pub async fn expect_error(resp: Response<Body>, status: StatusCode, kind: &str) {
    assert_eq!(resp.status(), status);
    let body = body_json(resp).await;
    assert_eq!(body["error"], kind, "unexpected body: {body}");
}
