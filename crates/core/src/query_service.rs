use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Opaque identifier of one remote result stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of a page. Every row carries the column names it was produced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRow {
    pub columns: Vec<String>,
    pub values: Vec<String>,
}

impl QueryRow {
    #[must_use]
    pub fn new(columns: Vec<String>, values: Vec<String>) -> Self {
        Self { columns, values }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct QueryServiceError {
    message: String,
}

impl QueryServiceError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unknown_session(id: &SessionId) -> Self {
        Self::new(format!("unknown session {id}"))
    }
}

/// Remote engine that executes SQL and hands results back page by page.
///
/// `next` returning an empty page is the only end-of-stream signal.
#[async_trait]
pub trait RemoteQueryService: Send + Sync {
    async fn stream(&self, sql: &str) -> Result<SessionId, QueryServiceError>;

    async fn next(&self, id: &SessionId) -> Result<Vec<QueryRow>, QueryServiceError>;

    /// Releases server-side resources held for `id`.
    async fn close(&self, _id: &SessionId) -> Result<(), QueryServiceError> {
        Ok(())
    }
}
