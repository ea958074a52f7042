//! In-process stores behind `parking_lot` locks.
//!
//! Each call takes the lock once and releases it before returning, so every
//! operation is atomic with respect to concurrent requests. Password hashing
//! runs on the blocking pool, outside any lock.

use std::collections::BTreeMap;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;

use super::{ModelError, Snippet, SnippetStore, User, UserStore};

const LATEST_LIMIT: usize = 10;

// ── Snippets ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SnippetTable {
    last_id: i64,
    rows: BTreeMap<i64, Snippet>,
}

#[derive(Default)]
pub struct MemorySnippetStore {
    table: RwLock<SnippetTable>,
}

impl MemorySnippetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnippetStore for MemorySnippetStore {
    async fn insert(&self, title: &str, content: &str, expires_days: i64) -> Result<i64, ModelError> {
        let created = Utc::now();
        let mut table = self.table.write();
        table.last_id += 1;
        let id = table.last_id;
        table.rows.insert(id, Snippet {
            id,
            title: title.to_owned(),
            content: content.to_owned(),
            created,
            expires: created + Duration::days(expires_days),
        });
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Snippet, ModelError> {
        let now = Utc::now();
        self.table
            .read()
            .rows
            .get(&id)
            .filter(|s| s.expires > now)
            .cloned()
            .ok_or(ModelError::NoRecord)
    }

    async fn latest(&self) -> Result<Vec<Snippet>, ModelError> {
        let now = Utc::now();
        let table = self.table.read();
        Ok(table
            .rows
            .values()
            .rev()
            .filter(|s| s.expires > now)
            .take(LATEST_LIMIT)
            .cloned()
            .collect())
    }
}

// ── Users ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct UserTable {
    last_id: i64,
    rows: BTreeMap<i64, User>,
}

impl UserTable {
    fn by_email(&self, email: &str) -> Option<&User> {
        self.rows.values().find(|u| u.email.eq_ignore_ascii_case(email))
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    table: RwLock<UserTable>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a user inactive. Their existing sessions stop authenticating.
    pub fn deactivate(&self, id: i64) -> Result<(), ModelError> {
        let mut table = self.table.write();
        let user = table.rows.get_mut(&id).ok_or(ModelError::NoRecord)?;
        user.active = false;
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, name: &str, email: &str, password: &str) -> Result<(), ModelError> {
        if self.table.read().by_email(email).is_some() {
            return Err(ModelError::DuplicateEmail);
        }

        let hashed_password = hash_password(password.to_owned()).await?;

        // Re-check under the write lock: another signup may have won the race
        // while we were hashing.
        let mut table = self.table.write();
        if table.by_email(email).is_some() {
            return Err(ModelError::DuplicateEmail);
        }
        table.last_id += 1;
        let id = table.last_id;
        table.rows.insert(id, User {
            id,
            name: name.to_owned(),
            email: email.to_owned(),
            hashed_password,
            created: Utc::now(),
            active: true,
        });
        Ok(())
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<i64, ModelError> {
        let (id, hash) = {
            let table = self.table.read();
            match table.by_email(email) {
                Some(user) if user.active => (user.id, user.hashed_password.clone()),
                _ => return Err(ModelError::InvalidCredentials),
            }
        };

        if verify_password(password.to_owned(), hash).await? {
            Ok(id)
        } else {
            Err(ModelError::InvalidCredentials)
        }
    }

    async fn get(&self, id: i64) -> Result<User, ModelError> {
        self.table.read().rows.get(&id).cloned().ok_or(ModelError::NoRecord)
    }
}

async fn hash_password(password: String) -> Result<String, ModelError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ModelError::Internal(format!("hash password: {e}")))
    })
    .await
    .map_err(|e| ModelError::Internal(format!("hash task: {e}")))?
}

async fn verify_password(password: String, hash: String) -> Result<bool, ModelError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash)
            .map_err(|e| ModelError::Internal(format!("stored hash: {e}")))?;
        Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
    })
    .await
    .map_err(|e| ModelError::Internal(format!("verify task: {e}")))?
}
