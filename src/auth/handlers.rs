use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    response::{AppendHeaders, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        authorize::{authorize, bearer_token},
        claims::Role,
        dto::{LoginRequest, LoginResponse, OkResponse, Profile, RegisterRequest, UserResponse},
    },
    config::CookieConfig,
    error::{AuthError, AuthResult},
    state::AppState,
};

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/session", get(get_session))
        .route("/session/login", post(login))
        .route("/session/logout", post(logout))
        .route("/session/revoke", post(revoke))
        .route("/registration", post(register))
}

pub fn dashboard_routes() -> Router<AppState> {
    Router::new().route("/api/dashboard", get(dashboard))
}

// Surrounding whitespace only; emails are case-sensitive as stored.
fn normalize_email(raw: &str) -> &str {
    raw.trim()
}

fn cookie_attrs(cfg: &CookieConfig) -> &'static str {
    if cfg.secure {
        "HttpOnly; Secure; SameSite=Lax; Path=/"
    } else {
        "HttpOnly; SameSite=Lax; Path=/"
    }
}

fn session_cookie(cfg: &CookieConfig, name: &str, token: &str, max_age: u64) -> AuthResult<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{name}={token}; Max-Age={max_age}; {}",
        cookie_attrs(cfg)
    ))
    .map_err(|e| AuthError::Internal(anyhow::Error::new(e).context("build session cookie")))
}

fn clear_cookie(cfg: &CookieConfig, name: &str) -> AuthResult<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{name}=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; {}",
        cookie_attrs(cfg)
    ))
    .map_err(|e| AuthError::Internal(anyhow::Error::new(e).context("build clearing cookie")))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AuthResult<impl IntoResponse> {
    let email = normalize_email(&payload.email);
    let (user, token) = state.auth.login(email, &payload.password).await?;

    let cookies = &state.config.cookies;
    let name = match user.role {
        Role::Admin => &cookies.admin_cookie,
        Role::User => &cookies.user_cookie,
    };
    let cookie = session_cookie(cookies, name, &token, state.auth.tokens().ttl().as_secs())?;

    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(LoginResponse { user, token }),
    ))
}

#[instrument(skip(state, headers))]
pub async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AuthResult<Json<UserResponse>> {
    let token = bearer_token(&headers)?;
    let user = state.auth.verify_session(token).await?;
    Ok(Json(UserResponse { user }))
}

/// Clears the client-held cookies. Tokens stay valid until expiry; use
/// `/session/revoke` to invalidate them server-side.
#[instrument(skip(state))]
pub async fn logout(State(state): State<AppState>) -> AuthResult<impl IntoResponse> {
    let cookies = &state.config.cookies;
    Ok((
        AppendHeaders([
            (SET_COOKIE, clear_cookie(cookies, &cookies.user_cookie)?),
            (SET_COOKIE, clear_cookie(cookies, &cookies.admin_cookie)?),
        ]),
        Json(OkResponse { ok: true }),
    ))
}

#[instrument(skip(state, headers))]
pub async fn revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AuthResult<Json<OkResponse>> {
    let auth = state.auth.clone();
    authorize(&state, &headers, &[Role::User, Role::Admin], |user| async move {
        auth.revoke_sessions(user.id).await?;
        info!(user_id = %user.id, "user revoked own sessions");
        Ok(Json(OkResponse { ok: true }))
    })
    .await
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AuthResult<Json<UserResponse>> {
    let email = normalize_email(&payload.email);
    let profile = Profile {
        name: payload.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
    };
    let user = state
        .auth
        .register(email, &payload.password, payload.invite_code.trim(), profile)
        .await?;
    Ok(Json(UserResponse { user }))
}

#[instrument(skip(state, headers))]
pub async fn dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AuthResult<Json<UserResponse>> {
    authorize(&state, &headers, &[Role::User, Role::Admin], |user| async move {
        Ok(Json(UserResponse { user }))
    })
    .await
}
