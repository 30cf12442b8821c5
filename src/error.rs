//! Error types for the schema registry

use thiserror::Error;

use crate::account::AccountId;
use crate::cache::RenderError;
use crate::object::SchemaId;

/// Result type for schema operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Schema registry errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Refcount underflow: account {account} does not reference schema {schema_id}")]
    RefcountUnderflow { schema_id: SchemaId, account: AccountId },

    #[error("Account {account} does not reference schema {schema_id}")]
    UnreferencedAccount { schema_id: SchemaId, account: AccountId },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("Schema not found: {0}")]
    UnknownSchema(SchemaId),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Schema automaton is no longer running")]
    AutomatonStopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl SchemaError {
    /// Whether this error means the registry state can no longer be trusted.
    ///
    /// Fatal errors stop the mutation automaton; everything else is reported
    /// to the caller and processing continues. Charging an account that has
    /// just dropped its last reference is an expected race with reconciliation
    /// and is not fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchemaError::RefcountUnderflow { .. } | SchemaError::InvariantViolation(_)
        )
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        SchemaError::CorruptSnapshot(message.into())
    }
}
