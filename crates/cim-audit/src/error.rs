use cim_types::MergeLogId;

/// Errors produced by audit log operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    #[error("integrity violation at seq {seq}: {reason}")]
    IntegrityViolation { seq: u64, reason: String },

    #[error("merge log not found: {0}")]
    MissingMergeLog(MergeLogId),

    #[error("merge {0} has already been undone")]
    AlreadyUndone(MergeLogId),

    #[error("duplicate merge log id: {0}")]
    DuplicateId(MergeLogId),

    #[error("undo window of {0} cannot be added to the merge time")]
    UndoWindowOutOfRange(chrono::Duration),

    #[error("audit log is read-only")]
    ReadOnly,

    #[error("serialization error: {0}")]
    Serialization(String),
}
