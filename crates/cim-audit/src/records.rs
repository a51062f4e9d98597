use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cim_types::{
    ActorId, ClientId, ClientSnapshot, ClientStatus, FieldResolutions, MergeLogId,
    OrganizationId, RowId,
};

/// One dependent row rewritten by a merge, with the key it held before and
/// the key the merge wrote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReparentedRow {
    pub table: String,
    pub column: String,
    pub row_id: RowId,
    pub previous_value: String,
    pub written_value: String,
}

/// Everything the orchestrator hands to the audit writer. The writer adds
/// the identity, chain position, and timestamps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeLogDraft {
    pub organization_id: OrganizationId,
    pub primary_client_id: ClientId,
    pub secondary_client_ids: Vec<ClientId>,
    pub performed_by: ActorId,
    pub field_resolutions: FieldResolutions,
    pub before_snapshots: BTreeMap<ClientId, ClientSnapshot>,
    pub reparenting_counts: BTreeMap<String, u64>,
    pub reparented_rows: BTreeMap<String, Vec<ReparentedRow>>,
    pub skipped_tables: BTreeMap<String, String>,
    pub tombstoned_client_ids: Vec<ClientId>,
    pub relinked_clients: BTreeMap<ClientId, ClientId>,
    pub resumes: Option<MergeLogId>,
}

/// Immutable record of one merge run.
///
/// A run whose tombstoning failed part way is logged too; its
/// `tombstoned_client_ids` then lists fewer secondaries than the snapshots
/// show as active, and a later run over the same primary resumes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeLog {
    pub id: MergeLogId,
    pub organization_id: OrganizationId,
    pub seq: u64,
    pub prev_hash: Option<[u8; 32]>,
    pub entry_hash: [u8; 32],
    pub primary_client_id: ClientId,
    pub secondary_client_ids: Vec<ClientId>,
    pub performed_by: ActorId,
    pub field_resolutions: FieldResolutions,
    /// Client id -> full state read before any mutation.
    pub before_snapshots: BTreeMap<ClientId, ClientSnapshot>,
    /// Table label -> rows changed.
    pub reparenting_counts: BTreeMap<String, u64>,
    /// Table label -> exactly which rows were changed, for undo.
    pub reparented_rows: BTreeMap<String, Vec<ReparentedRow>>,
    /// Table label -> why it contributed no count. Never exposed to callers.
    pub skipped_tables: BTreeMap<String, String>,
    /// Secondaries this run (or a run it resumes) marked as merged.
    #[serde(default)]
    pub tombstoned_client_ids: Vec<ClientId>,
    /// Records that were merged into a secondary, re-pointed at the primary:
    /// record id -> the secondary it pointed at before.
    #[serde(default)]
    pub relinked_clients: BTreeMap<ClientId, ClientId>,
    /// The interrupted merge this run finished. Its changes are carried in
    /// this log and undone with it.
    #[serde(default)]
    pub resumes: Option<MergeLogId>,
    pub created_at: DateTime<Utc>,
    pub undo_expires_at: DateTime<Utc>,
}

impl MergeLog {
    pub fn undo_window_open_at(&self, now: DateTime<Utc>) -> bool {
        now < self.undo_expires_at
    }

    /// Every client id this merge involved, primary first.
    pub fn involved_clients(&self) -> Vec<ClientId> {
        std::iter::once(self.primary_client_id)
            .chain(self.secondary_client_ids.iter().copied())
            .collect()
    }

    pub fn total_reparented(&self) -> u64 {
        self.reparenting_counts.values().sum()
    }

    /// Secondaries that were active before the merge but that the run never
    /// got to tombstone.
    pub fn pending_secondaries(&self) -> Vec<ClientId> {
        self.secondary_client_ids
            .iter()
            .filter(|id| {
                self.before_snapshots
                    .get(id)
                    .is_some_and(|s| s.client.status == ClientStatus::Active)
                    && !self.tombstoned_client_ids.contains(id)
            })
            .copied()
            .collect()
    }

    /// Returns `true` if tombstoning stopped before every secondary was
    /// merged.
    pub fn is_interrupted(&self) -> bool {
        !self.pending_secondaries().is_empty()
    }
}

/// Input for recording a reversal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoDraft {
    pub merge_log_id: MergeLogId,
    pub performed_by: ActorId,
    pub restored_counts: BTreeMap<String, u64>,
}

/// Immutable record of a reversed merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoRecord {
    pub merge_log_id: MergeLogId,
    pub organization_id: OrganizationId,
    pub seq: u64,
    pub prev_hash: Option<[u8; 32]>,
    pub entry_hash: [u8; 32],
    pub performed_by: ActorId,
    pub undone_at: DateTime<Utc>,
    /// Table label -> rows pointed back at their original client.
    pub restored_counts: BTreeMap<String, u64>,
}

/// Kind of entry in an organization's audit chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    Merge,
    Undo,
}

/// A single entry in an organization's hash-linked audit chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEntry {
    Merge(MergeLog),
    Undo(UndoRecord),
}

impl AuditEntry {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Merge(_) => EntryKind::Merge,
            Self::Undo(_) => EntryKind::Undo,
        }
    }

    pub fn organization_id(&self) -> OrganizationId {
        match self {
            Self::Merge(m) => m.organization_id,
            Self::Undo(u) => u.organization_id,
        }
    }

    pub fn merge_log_id(&self) -> MergeLogId {
        match self {
            Self::Merge(m) => m.id,
            Self::Undo(u) => u.merge_log_id,
        }
    }

    pub fn seq(&self) -> u64 {
        match self {
            Self::Merge(m) => m.seq,
            Self::Undo(u) => u.seq,
        }
    }

    pub fn prev_hash(&self) -> Option<[u8; 32]> {
        match self {
            Self::Merge(m) => m.prev_hash,
            Self::Undo(u) => u.prev_hash,
        }
    }

    pub fn entry_hash(&self) -> [u8; 32] {
        match self {
            Self::Merge(m) => m.entry_hash,
            Self::Undo(u) => u.entry_hash,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Merge(m) => m.created_at,
            Self::Undo(u) => u.undone_at,
        }
    }

    pub fn as_merge(&self) -> Option<&MergeLog> {
        match self {
            Self::Merge(m) => Some(m),
            Self::Undo(_) => None,
        }
    }

    pub fn as_undo(&self) -> Option<&UndoRecord> {
        match self {
            Self::Undo(u) => Some(u),
            Self::Merge(_) => None,
        }
    }

    pub(crate) fn set_entry_hash(&mut self, hash: [u8; 32]) {
        match self {
            Self::Merge(m) => m.entry_hash = hash,
            Self::Undo(u) => u.entry_hash = hash,
        }
    }

    /// Short hex form of the entry hash for display.
    pub fn short_hash(&self) -> String {
        hex::encode(&self.entry_hash()[..4])
    }
}
