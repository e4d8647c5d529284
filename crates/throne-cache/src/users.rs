//! Cached user list and credential checks.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::info;

use throne_store::{NewUser, Store, User};

use crate::cache::{Caches, EntityCache, Snapshot};
use crate::error::{CoreError, CoreResult};

/// Keyed password digest. Only digests are ever stored or compared.
#[derive(Clone)]
pub struct PasswordDigester {
    key: String,
}

impl PasswordDigester {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Hex-encoded SHA-256 of `key | password`.
    pub fn digest(&self, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key.as_bytes());
        hasher.update(b"|");
        hasher.update(password.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl std::fmt::Debug for PasswordDigester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordDigester").finish_non_exhaustive()
    }
}

/// Users and authentication on top of the store.
pub struct UserDirectory {
    store: Arc<dyn Store>,
    users: Arc<EntityCache<User>>,
    digester: PasswordDigester,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn Store>, caches: &Caches, digester: PasswordDigester) -> Self {
        Self {
            store,
            users: Arc::clone(&caches.users),
            digester,
        }
    }

    pub fn digester(&self) -> &PasswordDigester {
        &self.digester
    }

    /// Every registered user.
    pub async fn load_users(&self) -> CoreResult<Snapshot<User>> {
        Ok(self.users.get(|| self.store.list_users()).await?)
    }

    /// Check a clear-text password.
    pub async fn authenticate(&self, login: &str, password: &str) -> CoreResult<User> {
        let digest = self.digester.digest(password);
        self.find_by_digest(login, &digest).await
    }

    /// Check an already digested password, e.g. from a session cookie.
    pub async fn find_by_digest(&self, login: &str, digest: &str) -> CoreResult<User> {
        if login.is_empty() || digest.is_empty() {
            return Err(CoreError::Validation("login and password are required".to_string()));
        }
        self.store
            .find_user(&login.to_lowercase(), digest)
            .await?
            .ok_or_else(|| CoreError::NotFound("invalid login or password".to_string()))
    }

    /// Register a user.
    pub async fn add_user(
        &self,
        login: &str,
        name: &str,
        password: &str,
        is_admin: bool,
    ) -> CoreResult<User> {
        if login.is_empty() || password.is_empty() {
            return Err(CoreError::Validation("login and password are required".to_string()));
        }

        let new = NewUser {
            login: login.to_lowercase(),
            name: name.to_string(),
            password_digest: self.digester.digest(password),
            is_admin,
        };
        let id = self.store.insert_user(&new).await?;
        self.users.invalidate();

        info!(id, login = %new.login, is_admin, "user added");
        Ok(User {
            id,
            login: new.login,
            name: new.name,
            is_admin,
        })
    }

    pub fn invalidate(&self) {
        self.users.invalidate();
    }
}
