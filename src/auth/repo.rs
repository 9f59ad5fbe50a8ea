use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::claims::Role;
use crate::auth::repo_types::{InviteCode, NewUser, User};

/// Failures of the combined "create user + consume invite" write.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invite code unavailable")]
    InviteUnavailable,
    #[error("email already registered")]
    EmailTaken,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Persistence of users and invite codes.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    /// Inserts a user without an invite (admin provisioning, seeding).
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError>;
    /// Inserts the user and flips the invite from unused to used in one step.
    /// Fails with `InviteUnavailable` if the code is missing or already used
    /// at write time; nothing is written in that case.
    async fn register_with_invite(&self, new: NewUser, code: &str) -> Result<User, StoreError>;
    async fn touch_last_login(&self, id: Uuid) -> anyhow::Result<()>;
    async fn set_role(&self, id: Uuid, role: Role) -> anyhow::Result<Option<User>>;
    /// Returns the new generation, or `None` if the user does not exist.
    async fn bump_token_version(&self, id: Uuid) -> anyhow::Result<Option<i32>>;
    async fn find_invite(&self, code: &str) -> anyhow::Result<Option<InviteCode>>;
    async fn create_invite(&self, code: &str) -> anyhow::Result<InviteCode>;
    async fn list_invites(&self) -> anyhow::Result<Vec<InviteCode>>;
}

#[derive(Clone)]
pub struct PgCredentialStore {
    db: PgPool,
}

impl PgCredentialStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_insert_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::EmailTaken,
        _ => StoreError::Backend(anyhow::Error::new(e).context("insert user")),
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, name, role, is_verified, last_login_at,
                   token_version, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, name, role, is_verified, last_login_at,
                   token_version, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, name, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, password_hash, name, role, is_verified, last_login_at,
                      token_version, created_at, updated_at
            "#,
        )
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.name)
        .bind(new.role)
        .fetch_one(&self.db)
        .await
        .map_err(map_insert_error)
    }

    async fn register_with_invite(&self, new: NewUser, code: &str) -> Result<User, StoreError> {
        let mut tx = self
            .db
            .begin()
            .await
            .context("begin registration transaction")?;

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, name, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, password_hash, name, role, is_verified, last_login_at,
                      token_version, created_at, updated_at
            "#,
        )
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.name)
        .bind(new.role)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_insert_error)?;

        // Conditional update: only one concurrent registration can win the code.
        let consumed = sqlx::query(
            r#"
            UPDATE invite_codes
            SET is_used = TRUE, used_by = $2, used_at = now()
            WHERE code = $1 AND is_used = FALSE
            "#,
        )
        .bind(code)
        .bind(user.id)
        .execute(&mut *tx)
        .await
        .context("consume invite code")?;

        if consumed.rows_affected() != 1 {
            tx.rollback().await.context("rollback registration")?;
            return Err(StoreError::InviteUnavailable);
        }

        tx.commit().await.context("commit registration")?;
        Ok(user)
    }

    async fn touch_last_login(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(r#"UPDATE users SET last_login_at = now(), updated_at = now() WHERE id = $1"#)
            .bind(id)
            .execute(&self.db)
            .await
            .context("update last login")?;
        Ok(())
    }

    async fn set_role(&self, id: Uuid, role: Role) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET role = $2, updated_at = now()
            WHERE id = $1
            RETURNING id, email, password_hash, name, role, is_verified, last_login_at,
                      token_version, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(role)
        .fetch_optional(&self.db)
        .await
        .context("update role")?;
        Ok(user)
    }

    async fn bump_token_version(&self, id: Uuid) -> anyhow::Result<Option<i32>> {
        let version = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE users SET token_version = token_version + 1, updated_at = now()
            WHERE id = $1
            RETURNING token_version
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("bump token version")?;
        Ok(version)
    }

    async fn find_invite(&self, code: &str) -> anyhow::Result<Option<InviteCode>> {
        let invite = sqlx::query_as::<_, InviteCode>(
            r#"SELECT code, is_used, used_by, created_at, used_at FROM invite_codes WHERE code = $1"#,
        )
        .bind(code)
        .fetch_optional(&self.db)
        .await
        .context("find invite code")?;
        Ok(invite)
    }

    async fn create_invite(&self, code: &str) -> anyhow::Result<InviteCode> {
        let invite = sqlx::query_as::<_, InviteCode>(
            r#"
            INSERT INTO invite_codes (code)
            VALUES ($1)
            RETURNING code, is_used, used_by, created_at, used_at
            "#,
        )
        .bind(code)
        .fetch_one(&self.db)
        .await
        .context("insert invite code")?;
        Ok(invite)
    }

    async fn list_invites(&self) -> anyhow::Result<Vec<InviteCode>> {
        let rows = sqlx::query_as::<_, InviteCode>(
            r#"
            SELECT code, is_used, used_by, created_at, used_at
            FROM invite_codes
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.db)
        .await
        .context("list invite codes")?;
        Ok(rows)
    }
}
