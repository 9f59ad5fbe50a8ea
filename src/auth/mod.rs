use crate::state::AppState;
use axum::Router;

pub mod authorize;
pub mod claims;
pub mod dto;
pub mod gate;
pub mod handlers;
pub mod memory;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod token;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::session_routes())
        .merge(handlers::dashboard_routes())
}
