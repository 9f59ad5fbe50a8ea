use serde::{Deserialize, Serialize};

use crate::auth::{claims::Role, repo_types::InviteCode};

#[derive(Debug, Deserialize)]
pub struct ProvisionUserRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct InviteResponse {
    pub invite: InviteCode,
}

#[derive(Debug, Serialize)]
pub struct InviteListResponse {
    pub invites: Vec<InviteCode>,
}
