use cim_audit::AuditError;
use cim_gate::GateError;
use cim_store::StoreError;
use cim_types::{ClientId, MergeLogId};

/// Caller-facing failure categories.
///
/// A table that could not be reparented or reconciled is not an error: it is
/// recorded as a [`SkipReason`](crate::SkipReason) and the merge continues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MergeErrorKind {
    Authentication,
    Authorization,
    NotFound,
    Validation,
    Conflict,
    Persistence,
}

/// Errors from merge and undo operations.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("authentication required: {0}")]
    Authentication(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("client not found: {0}")]
    ClientNotFound(ClientId),

    #[error("merge log not found: {0}")]
    MergeLogNotFound(MergeLogId),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The primary's resolvable fields could not be written. Nothing was
    /// changed.
    #[error("field resolution failed: {0}")]
    FieldResolution(#[source] StoreError),

    /// Secondary records could not be tombstoned after their dependents were
    /// reparented.
    #[error("tombstone write failed: {0}")]
    Tombstone(#[source] StoreError),

    /// The merge's structural changes are committed but its log is not.
    #[error("audit log write failed: {0}")]
    AuditWrite(#[source] AuditError),

    #[error("datastore error: {0}")]
    Store(#[from] StoreError),

    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("gate error: {0}")]
    Gate(#[from] GateError),

    #[error("engine configuration: {0}")]
    Config(String),
}

impl MergeError {
    pub fn kind(&self) -> MergeErrorKind {
        match self {
            Self::Authentication(_) => MergeErrorKind::Authentication,
            Self::Forbidden(_) => MergeErrorKind::Authorization,
            Self::ClientNotFound(_) | Self::MergeLogNotFound(_) => MergeErrorKind::NotFound,
            Self::Validation(_) => MergeErrorKind::Validation,
            Self::Conflict(_) => MergeErrorKind::Conflict,
            Self::FieldResolution(_)
            | Self::Tombstone(_)
            | Self::AuditWrite(_)
            | Self::Store(_)
            | Self::Audit(_)
            | Self::Gate(_)
            | Self::Config(_) => MergeErrorKind::Persistence,
        }
    }
}

pub type MergeResult<T> = Result<T, MergeError>;
