use cim_types::{ClientId, ClientStatus};

/// Errors from datastore operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested client row does not exist.
    #[error("client not found: {0}")]
    ClientNotFound(ClientId),

    /// The named table does not exist in this datastore.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// The table exists but lacks the named column.
    #[error("column '{column}' not found in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    /// A write required the row to be in a status it was not in.
    #[error("client {id} is {actual}, expected {expected}")]
    StatusMismatch {
        id: ClientId,
        expected: ClientStatus,
        actual: ClientStatus,
    },

    /// The backend rejected or failed the operation.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for datastore operations.
pub type StoreResult<T> = Result<T, StoreError>;
