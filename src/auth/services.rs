use std::sync::Arc;

use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::{
    claims::Role,
    dto::{Profile, PublicUser},
    password::{hash_password_async, verify_password_async},
    repo::{CredentialStore, StoreError},
    repo_types::{InviteCode, NewUser},
    token::TokenService,
};
use crate::error::{AuthError, AuthResult};

pub const MIN_PASSWORD_LEN: usize = 8;
const INVITE_CODE_LEN: usize = 12;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

// Verified against on unknown emails so both login failures cost the same.
static DUMMY_HASH: OnceCell<String> = OnceCell::const_new();

/// Hashed once, on the blocking pool, the first time an unknown email logs in.
async fn dummy_hash() -> AuthResult<String> {
    let hash = DUMMY_HASH
        .get_or_try_init(|| hash_password_async("formations-dummy-password".to_owned()))
        .await?;
    Ok(hash.clone())
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

fn from_store_error(e: StoreError) -> AuthError {
    match e {
        StoreError::InviteUnavailable => AuthError::InvalidInvite,
        StoreError::EmailTaken => AuthError::EmailTaken,
        StoreError::Backend(e) => AuthError::Internal(e),
    }
}

/// Login, session lookup, registration and the account operations around them.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    tokens: TokenService,
}

impl AuthService {
    pub fn new(store: Arc<dyn CredentialStore>, tokens: TokenService) -> Self {
        Self { store, tokens }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Unknown email and wrong password both yield `InvalidCredentials`.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<(PublicUser, String)> {
        let user = match self.store.find_by_email(email).await? {
            Some(u) => u,
            None => {
                let _ = verify_password_async(password.to_owned(), dummy_hash().await?).await;
                warn!("login unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let ok = verify_password_async(password.to_owned(), user.password_hash.clone()).await?;
        if !ok {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        let token = self.tokens.issue(user.id, user.role, user.token_version)?;
        self.store.touch_last_login(user.id).await?;
        let user = self
            .store
            .find_by_id(user.id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        info!(user_id = %user.id, role = %user.role, "user logged in");
        Ok((user.into(), token))
    }

    /// Verifies the token and re-reads the user so role changes, deletions and
    /// revocations since issue time take effect.
    #[instrument(skip(self, token))]
    pub async fn verify_session(&self, token: &str) -> AuthResult<PublicUser> {
        let claims = self.tokens.verify(token)?;
        let user = self
            .store
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| {
                warn!(user_id = %claims.sub, "session subject no longer exists");
                AuthError::UserNotFound
            })?;

        if user.token_version != claims.ver {
            warn!(user_id = %user.id, "session revoked");
            return Err(AuthError::InvalidToken);
        }
        Ok(user.into())
    }

    #[instrument(skip(self, password, invite_code, profile))]
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        invite_code: &str,
        profile: Profile,
    ) -> AuthResult<PublicUser> {
        validate_credentials(email, password)?;

        match self.store.find_invite(invite_code).await? {
            Some(invite) if !invite.is_used => {}
            _ => {
                warn!("registration with unknown or used invite");
                return Err(AuthError::InvalidInvite);
            }
        }

        if self.store.find_by_email(email).await?.is_some() {
            warn!("email already registered");
            return Err(AuthError::EmailTaken);
        }

        let password_hash = hash_password_async(password.to_owned()).await?;
        let new = NewUser {
            email: email.to_owned(),
            password_hash,
            name: profile.name,
            role: Role::User,
        };
        let user = self
            .store
            .register_with_invite(new, invite_code)
            .await
            .map_err(from_store_error)?;

        info!(user_id = %user.id, "user registered");
        Ok(user.into())
    }

    /// Creates an account directly, without an invite.
    #[instrument(skip(self, password))]
    pub async fn provision_user(
        &self,
        email: &str,
        password: &str,
        name: Option<String>,
        role: Role,
    ) -> AuthResult<PublicUser> {
        validate_credentials(email, password)?;
        let password_hash = hash_password_async(password.to_owned()).await?;
        let user = self
            .store
            .create_user(NewUser {
                email: email.to_owned(),
                password_hash,
                name,
                role,
            })
            .await
            .map_err(from_store_error)?;
        info!(user_id = %user.id, role = %user.role, "user provisioned");
        Ok(user.into())
    }

    /// Invalidates every token issued to the user so far.
    #[instrument(skip(self))]
    pub async fn revoke_sessions(&self, user_id: Uuid) -> AuthResult<()> {
        let version = self
            .store
            .bump_token_version(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        info!(user_id = %user_id, version, "sessions revoked");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_role(&self, user_id: Uuid, role: Role) -> AuthResult<PublicUser> {
        let user = self
            .store
            .set_role(user_id, role)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        info!(user_id = %user_id, role = %role, "role changed");
        Ok(user.into())
    }

    #[instrument(skip(self))]
    pub async fn create_invite(&self) -> AuthResult<InviteCode> {
        let code: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(INVITE_CODE_LEN)
            .map(|c| char::from(c).to_ascii_uppercase())
            .collect();
        let invite = self.store.create_invite(&code).await?;
        info!("invite code created");
        Ok(invite)
    }

    pub async fn list_invites(&self) -> AuthResult<Vec<InviteCode>> {
        Ok(self.store.list_invites().await?)
    }
}

fn validate_credentials(email: &str, password: &str) -> AuthResult<()> {
    if !is_valid_email(email) {
        return Err(AuthError::ValidationFailed("Invalid email".into()));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::ValidationFailed("Password too short".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::memory::MemoryCredentialStore;
    use crate::config::JwtConfig;
    use std::time::Duration;

    fn tokens() -> TokenService {
        TokenService::new(&JwtConfig {
            secret: "test-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            ttl_minutes: crate::config::DEFAULT_TTL_MINUTES,
        })
    }

    fn service() -> (AuthService, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        (AuthService::new(store.clone(), tokens()), store)
    }

    async fn seeded(role: Role) -> (AuthService, Arc<MemoryCredentialStore>, PublicUser) {
        let (svc, store) = service();
        let user = svc
            .provision_user("test@x.io", "secret123", Some("Test".into()), role)
            .await
            .expect("provision");
        (svc, store, user)
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("test@x.io"));
        assert!(!is_valid_email("test@x"));
        assert!(!is_valid_email("te st@x.io"));
    }

    #[tokio::test]
    async fn login_then_verify_resolves_same_user() {
        let (svc, _, user) = seeded(Role::User).await;
        let (logged_in, token) = svc.login("test@x.io", "secret123").await.expect("login");
        assert_eq!(logged_in.id, user.id);
        assert!(logged_in.last_login_at.is_some());

        let resolved = svc.verify_session(&token).await.expect("verify");
        assert_eq!(resolved.id, user.id);
        assert_eq!(resolved.role, Role::User);
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let (svc, _, _) = seeded(Role::User).await;
        let wrong_password = svc.login("test@x.io", "wrong").await.unwrap_err();
        let unknown_email = svc.login("nobody@x.io", "secret123").await.unwrap_err();
        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert!(matches!(unknown_email, AuthError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
    }

    #[tokio::test]
    async fn dummy_hash_is_computed_once_and_is_a_real_hash() {
        let first = dummy_hash().await.expect("dummy hash");
        let second = dummy_hash().await.expect("dummy hash");
        assert_eq!(first, second);
        assert!(first.starts_with("$argon2"));
        assert!(verify_password_async("formations-dummy-password".into(), first)
            .await
            .expect("verify"));
    }

    #[tokio::test]
    async fn email_lookup_is_case_sensitive() {
        let (svc, _) = service();
        svc.provision_user("Ada@X.io", "secret123", None, Role::User)
            .await
            .expect("provision");
        assert!(svc.login("Ada@X.io", "secret123").await.is_ok());
        assert!(matches!(
            svc.login("ada@x.io", "secret123").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn deleted_user_is_not_found_with_valid_token() {
        let (svc, store, user) = seeded(Role::User).await;
        let (_, token) = svc.login("test@x.io", "secret123").await.unwrap();
        store.delete_user(user.id).unwrap();
        assert!(matches!(
            svc.verify_session(&token).await,
            Err(AuthError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn role_change_is_seen_by_next_verify() {
        let (svc, _, user) = seeded(Role::User).await;
        let (_, token) = svc.login("test@x.io", "secret123").await.unwrap();
        svc.set_role(user.id, Role::Admin).await.unwrap();
        let resolved = svc.verify_session(&token).await.unwrap();
        assert_eq!(resolved.role, Role::Admin);
    }

    #[tokio::test]
    async fn revoked_sessions_fail_verification() {
        let (svc, _, user) = seeded(Role::User).await;
        let (_, old_token) = svc.login("test@x.io", "secret123").await.unwrap();
        svc.revoke_sessions(user.id).await.unwrap();
        assert!(matches!(
            svc.verify_session(&old_token).await,
            Err(AuthError::InvalidToken)
        ));

        let (_, new_token) = svc.login("test@x.io", "secret123").await.unwrap();
        assert_eq!(svc.verify_session(&new_token).await.unwrap().id, user.id);
    }

    #[tokio::test]
    async fn revoke_unknown_user() {
        let (svc, _) = service();
        assert!(matches!(
            svc.revoke_sessions(Uuid::new_v4()).await,
            Err(AuthError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn expired_session_token() {
        let store = Arc::new(MemoryCredentialStore::new());
        let svc = AuthService::new(store, tokens().with_ttl(Duration::from_secs(1)));
        svc.provision_user("test@x.io", "secret123", None, Role::User)
            .await
            .unwrap();
        let (_, token) = svc.login("test@x.io", "secret123").await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(
            svc.verify_session(&token).await,
            Err(AuthError::ExpiredToken)
        ));
    }

    #[tokio::test]
    async fn register_consumes_invite_once() {
        let (svc, _) = service();
        let invite = svc.create_invite().await.unwrap();
        assert_eq!(invite.code.len(), INVITE_CODE_LEN);

        let user = svc
            .register("new@x.io", "secret123", &invite.code, Profile::default())
            .await
            .expect("register");
        assert_eq!(user.role, Role::User);

        let again = svc
            .register("other@x.io", "secret123", &invite.code, Profile::default())
            .await
            .unwrap_err();
        assert!(matches!(again, AuthError::InvalidInvite));

        let (logged_in, _) = svc.login("new@x.io", "secret123").await.unwrap();
        assert_eq!(logged_in.id, user.id);
    }

    #[tokio::test]
    async fn register_rejects_unknown_invite() {
        let (svc, _) = service();
        let err = svc
            .register("new@x.io", "secret123", "NOPE", Profile::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidInvite));
    }

    #[tokio::test]
    async fn register_rejects_taken_email_and_keeps_invite() {
        let (svc, store, _) = seeded(Role::User).await;
        let invite = svc.create_invite().await.unwrap();
        let err = svc
            .register("test@x.io", "secret123", &invite.code, Profile::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
        assert!(!store.find_invite(&invite.code).await.unwrap().unwrap().is_used);
    }

    #[tokio::test]
    async fn concurrent_registrations_share_one_invite() {
        let (svc, _) = service();
        let invite = svc.create_invite().await.unwrap();

        let a = {
            let svc = svc.clone();
            let code = invite.code.clone();
            tokio::spawn(async move {
                svc.register("a@x.io", "secret123", &code, Profile::default())
                    .await
            })
        };
        let b = {
            let svc = svc.clone();
            let code = invite.code.clone();
            tokio::spawn(async move {
                svc.register("b@x.io", "secret123", &code, Profile::default())
                    .await
            })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AuthError::InvalidInvite))));
    }

    #[tokio::test]
    async fn register_validates_input() {
        let (svc, _) = service();
        let invite = svc.create_invite().await.unwrap();
        assert!(matches!(
            svc.register("bad-email", "secret123", &invite.code, Profile::default())
                .await,
            Err(AuthError::ValidationFailed(_))
        ));
        assert!(matches!(
            svc.register("a@x.io", "short", &invite.code, Profile::default())
                .await,
            Err(AuthError::ValidationFailed(_))
        ));
    }
}
