use chrono::{DateTime, Duration, Utc};
use cim_types::{MergeLogId, OrganizationId};

use crate::error::AuditError;
use crate::records::{AuditEntry, MergeLog, MergeLogDraft, UndoDraft, UndoRecord};

/// Write boundary for the merge audit log.
///
/// Entries are append-only: nothing here can modify or remove an entry once
/// it has been written.
pub trait AuditWriter: Send + Sync {
    /// Persist a merge log written at `now`, expiring its undo window after
    /// `undo_window`.
    fn append_merge(
        &self,
        draft: &MergeLogDraft,
        now: DateTime<Utc>,
        undo_window: Duration,
    ) -> Result<MergeLog, AuditError>;

    /// Persist the reversal of an existing merge log.
    fn append_undo(&self, draft: &UndoDraft, now: DateTime<Utc>) -> Result<UndoRecord, AuditError>;
}

/// Read boundary for audit queries.
pub trait AuditReader: Send + Sync {
    fn merge_log(&self, id: &MergeLogId) -> Result<Option<MergeLog>, AuditError>;

    /// The undo record for a merge, if it has been reversed.
    fn undo_of(&self, id: &MergeLogId) -> Result<Option<UndoRecord>, AuditError>;

    /// All entries of one organization's chain in sequence order.
    fn entries(&self, organization: &OrganizationId) -> Result<Vec<AuditEntry>, AuditError>;

    fn organizations(&self) -> Result<Vec<OrganizationId>, AuditError>;
}

/// Full audit log boundary used by the merge engine.
pub trait AuditLog: AuditWriter + AuditReader {}

impl<T: AuditWriter + AuditReader> AuditLog for T {}
