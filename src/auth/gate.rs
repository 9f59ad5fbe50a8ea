//! Edge pre-filter for protected pages. It only checks that the scope cookie
//! is present and redirects to the login page otherwise. No signature or
//! expiry check happens here; API handlers go through `authorize`.

use axum::{
    extract::{Request, State},
    http::{header::COOKIE, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::debug;

use crate::config::CookieConfig;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieScope {
    User,
    Admin,
}

impl CookieScope {
    fn cookie_name(self, cfg: &CookieConfig) -> &str {
        match self {
            CookieScope::User => &cfg.user_cookie,
            CookieScope::Admin => &cfg.admin_cookie,
        }
    }
}

pub struct ProtectedPrefix {
    pub prefix: &'static str,
    pub exempt: &'static [&'static str],
    pub scope: CookieScope,
    pub login_path: &'static str,
}

pub const PROTECTED_PREFIXES: &[ProtectedPrefix] = &[
    ProtectedPrefix {
        prefix: "/dashboard",
        exempt: &[],
        scope: CookieScope::User,
        login_path: "/login",
    },
    ProtectedPrefix {
        prefix: "/admin",
        exempt: &["/admin/login"],
        scope: CookieScope::Admin,
        login_path: "/admin/login",
    },
];

fn under_prefix(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn has_cookie(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .any(|(k, v)| k.trim() == name && !v.trim().is_empty())
}

/// Returns the login path to redirect to, or `None` when the request may pass.
pub fn redirect_target(path: &str, headers: &HeaderMap, cfg: &CookieConfig) -> Option<&'static str> {
    let rule = PROTECTED_PREFIXES.iter().find(|p| under_prefix(path, p.prefix))?;
    if rule.exempt.iter().any(|e| under_prefix(path, e)) {
        return None;
    }
    if has_cookie(headers, rule.scope.cookie_name(cfg)) {
        None
    } else {
        Some(rule.login_path)
    }
}

pub async fn session_gate(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let target = redirect_target(req.uri().path(), req.headers(), &state.config.cookies);
    match target {
        Some(login) => {
            debug!(path = %req.uri().path(), login, "no session cookie; redirecting");
            Redirect::temporary(login).into_response()
        }
        None => next.run(req).await,
    }
}
