use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::claims::Role;
use crate::auth::repo::{CredentialStore, StoreError};
use crate::auth::repo_types::{InviteCode, NewUser, User};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    invites: HashMap<String, InviteCode>,
}

/// Process-local credential store. Every write happens under one lock, so
/// invite consumption is exactly-once here as well.
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Inner>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("credential store lock poisoned"))
    }

    /// Removes a user outright. Only test fixtures need this.
    pub fn delete_user(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.lock()?.users.remove(&id).is_some())
    }
}

fn insert_user(inner: &mut Inner, new: NewUser) -> Result<User, StoreError> {
    if inner.users.values().any(|u| u.email == new.email) {
        return Err(StoreError::EmailTaken);
    }
    let now = OffsetDateTime::now_utc();
    let user = User {
        id: Uuid::new_v4(),
        email: new.email,
        password_hash: new.password_hash,
        name: new.name,
        role: new.role,
        is_verified: false,
        last_login_at: None,
        token_version: 0,
        created_at: now,
        updated_at: now,
    };
    inner.users.insert(user.id, user.clone());
    Ok(user)
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut inner = self.lock()?;
        insert_user(&mut inner, new)
    }

    async fn register_with_invite(&self, new: NewUser, code: &str) -> Result<User, StoreError> {
        let mut inner = self.lock()?;
        match inner.invites.get(code) {
            Some(invite) if !invite.is_used => {}
            _ => return Err(StoreError::InviteUnavailable),
        }
        let user = insert_user(&mut inner, new)?;
        if let Some(invite) = inner.invites.get_mut(code) {
            invite.is_used = true;
            invite.used_by = Some(user.id);
            invite.used_at = Some(OffsetDateTime::now_utc());
        }
        Ok(user)
    }

    async fn touch_last_login(&self, id: Uuid) -> anyhow::Result<()> {
        if let Some(user) = self.lock()?.users.get_mut(&id) {
            let now = OffsetDateTime::now_utc();
            user.last_login_at = Some(now);
            user.updated_at = now;
        }
        Ok(())
    }

    async fn set_role(&self, id: Uuid, role: Role) -> anyhow::Result<Option<User>> {
        let mut inner = self.lock()?;
        Ok(inner.users.get_mut(&id).map(|user| {
            user.role = role;
            user.updated_at = OffsetDateTime::now_utc();
            user.clone()
        }))
    }

    async fn bump_token_version(&self, id: Uuid) -> anyhow::Result<Option<i32>> {
        let mut inner = self.lock()?;
        Ok(inner.users.get_mut(&id).map(|user| {
            user.token_version += 1;
            user.updated_at = OffsetDateTime::now_utc();
            user.token_version
        }))
    }

    async fn find_invite(&self, code: &str) -> anyhow::Result<Option<InviteCode>> {
        Ok(self.lock()?.invites.get(code).cloned())
    }

    async fn create_invite(&self, code: &str) -> anyhow::Result<InviteCode> {
        let mut inner = self.lock()?;
        if inner.invites.contains_key(code) {
            anyhow::bail!("invite code {code} already exists");
        }
        let invite = InviteCode {
            code: code.to_string(),
            is_used: false,
            used_by: None,
            created_at: OffsetDateTime::now_utc(),
            used_at: None,
        };
        inner.invites.insert(invite.code.clone(), invite.clone());
        Ok(invite)
    }

    async fn list_invites(&self) -> anyhow::Result<Vec<InviteCode>> {
        let mut invites: Vec<InviteCode> = self.lock()?.invites.values().cloned().collect();
        invites.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invites)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password_hash: "hash".into(),
            name: None,
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn invite_is_consumed_once() {
        let store = MemoryCredentialStore::new();
        store.create_invite("WELCOME").await.unwrap();

        let first = store
            .register_with_invite(new_user("a@x.io"), "WELCOME")
            .await
            .expect("first registration");
        let invite = store.find_invite("WELCOME").await.unwrap().unwrap();
        assert!(invite.is_used);
        assert_eq!(invite.used_by, Some(first.id));

        let second = store
            .register_with_invite(new_user("b@x.io"), "WELCOME")
            .await
            .unwrap_err();
        assert!(matches!(second, StoreError::InviteUnavailable));
        assert!(store.find_by_email("b@x.io").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_keeps_invite_unused() {
        let store = MemoryCredentialStore::new();
        store.create_user(new_user("a@x.io")).await.unwrap();
        store.create_invite("CODE").await.unwrap();

        let err = store
            .register_with_invite(new_user("a@x.io"), "CODE")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EmailTaken));
        assert!(!store.find_invite("CODE").await.unwrap().unwrap().is_used);
    }

    #[tokio::test]
    async fn bump_token_version_counts_up() {
        let store = MemoryCredentialStore::new();
        let user = store.create_user(new_user("a@x.io")).await.unwrap();
        assert_eq!(store.bump_token_version(user.id).await.unwrap(), Some(1));
        assert_eq!(store.bump_token_version(user.id).await.unwrap(), Some(2));
        assert_eq!(store.bump_token_version(Uuid::new_v4()).await.unwrap(), None);
    }
}
