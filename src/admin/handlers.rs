use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post, put},
    Json, Router,
};
use serde::de::DeserializeOwned;
use tracing::{info, instrument};
use uuid::Uuid;

use super::dto::{InviteListResponse, InviteResponse, ProvisionUserRequest, SetRoleRequest};
use crate::{
    auth::{
        authorize::authorize,
        claims::Role,
        dto::{OkResponse, UserResponse},
    },
    error::{AuthError, AuthResult},
    state::AppState,
};

const ADMIN_ONLY: &[Role] = &[Role::Admin];

// Path and body are taken raw and decoded inside `authorize`, so an
// unauthenticated caller always sees the auth failure first.
fn parse_user_id(raw: &str) -> AuthResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AuthError::ValidationFailed(format!("invalid user id: {raw}")))
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> AuthResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| AuthError::ValidationFailed(format!("invalid request body: {e}")))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/invites", get(list_invites).post(create_invite))
        .route("/api/admin/users", post(provision_user))
        .route("/api/admin/users/:id/role", put(set_role))
        .route("/api/admin/users/:id/revoke", post(revoke_user))
}

#[instrument(skip(state, headers))]
pub async fn create_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AuthResult<Json<InviteResponse>> {
    let auth = state.auth.clone();
    authorize(&state, &headers, ADMIN_ONLY, |admin| async move {
        let invite = auth.create_invite().await?;
        info!(admin_id = %admin.id, "admin created invite");
        Ok(Json(InviteResponse { invite }))
    })
    .await
}

#[instrument(skip(state, headers))]
pub async fn list_invites(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AuthResult<Json<InviteListResponse>> {
    let auth = state.auth.clone();
    authorize(&state, &headers, ADMIN_ONLY, |_admin| async move {
        let invites = auth.list_invites().await?;
        Ok(Json(InviteListResponse { invites }))
    })
    .await
}

#[instrument(skip(state, headers, body))]
pub async fn provision_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AuthResult<Json<UserResponse>> {
    let auth = state.auth.clone();
    authorize(&state, &headers, ADMIN_ONLY, |admin| async move {
        let payload: ProvisionUserRequest = parse_body(&body)?;
        let user = auth
            .provision_user(payload.email.trim(), &payload.password, payload.name, payload.role)
            .await?;
        info!(admin_id = %admin.id, user_id = %user.id, "admin provisioned user");
        Ok(Json(UserResponse { user }))
    })
    .await
}

#[instrument(skip(state, headers, body))]
pub async fn set_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> AuthResult<Json<UserResponse>> {
    let auth = state.auth.clone();
    authorize(&state, &headers, ADMIN_ONLY, |admin| async move {
        let id = parse_user_id(&id)?;
        let payload: SetRoleRequest = parse_body(&body)?;
        let user = auth.set_role(id, payload.role).await?;
        info!(admin_id = %admin.id, user_id = %id, role = %payload.role, "admin changed role");
        Ok(Json(UserResponse { user }))
    })
    .await
}

#[instrument(skip(state, headers))]
pub async fn revoke_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AuthResult<Json<OkResponse>> {
    let auth = state.auth.clone();
    authorize(&state, &headers, ADMIN_ONLY, |admin| async move {
        let id = parse_user_id(&id)?;
        auth.revoke_sessions(id).await?;
        info!(admin_id = %admin.id, user_id = %id, "admin revoked sessions");
        Ok(Json(OkResponse { ok: true }))
    })
    .await
}
