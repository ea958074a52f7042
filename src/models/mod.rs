//! Domain records and the storage capabilities handlers depend on.
//!
//! Handlers only see the [`SnippetStore`] and [`UserStore`] traits. The
//! in-memory implementations in [`memory`] back the binary and the tests;
//! a relational store would implement the same traits.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcomes a store can report besides success.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("no matching record found")]
    NoRecord,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("duplicate email")]
    DuplicateEmail,

    /// The backing store failed; the message is for logs, never for clients.
    #[error("store failure: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snippet {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub hashed_password: String,
    pub created: DateTime<Utc>,
    pub active: bool,
}

#[async_trait]
pub trait SnippetStore: Send + Sync + 'static {
    /// Stores a snippet that expires `expires_days` from now and returns its id.
    async fn insert(&self, title: &str, content: &str, expires_days: i64) -> Result<i64, ModelError>;

    /// A non-expired snippet by id.
    async fn get(&self, id: i64) -> Result<Snippet, ModelError>;

    /// Up to ten non-expired snippets, newest first.
    async fn latest(&self) -> Result<Vec<Snippet>, ModelError>;
}

#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Creates a user. [`ModelError::DuplicateEmail`] if the address is taken.
    async fn insert(&self, name: &str, email: &str, password: &str) -> Result<(), ModelError>;

    /// The id of the active user with these credentials, or
    /// [`ModelError::InvalidCredentials`].
    async fn authenticate(&self, email: &str, password: &str) -> Result<i64, ModelError>;

    async fn get(&self, id: i64) -> Result<User, ModelError>;
}
