//! Error types for aixiv-state

use thiserror::Error;

/// Errors raised while connecting to or preparing a backend.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by the storage traits.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// No record of `kind` exists under `id`
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A record with the same key already exists
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    /// Attempted to change a record that is terminal or append-only
    #[error("{kind} {id} is immutable: {reason}")]
    ImmutableRecord {
        kind: &'static str,
        id: String,
        reason: String,
    },

    /// A pipeline run is not in the state the operation requires
    #[error("run {run_id} is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },

    /// A second active run was opened for a paper
    #[error("paper {paper_id} already has active run {run_id}")]
    ActiveRunExists { paper_id: String, run_id: String },

    /// Backend (database) failure
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Row could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StorageError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
