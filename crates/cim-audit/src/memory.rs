use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use cim_types::{MergeLogId, OrganizationId};

use crate::error::AuditError;
use crate::records::{AuditEntry, MergeLog, MergeLogDraft, UndoDraft, UndoRecord};
use crate::traits::{AuditReader, AuditWriter};
use crate::validation::{compute_entry_hash, ChainValidator};

/// In-memory audit log for tests, the CLI, and embedding.
///
/// Entries are kept in one hash-linked chain per organization.
#[derive(Debug)]
pub struct InMemoryAuditLog {
    inner: RwLock<AuditState>,
    read_only: AtomicBool,
}

#[derive(Debug, Default)]
struct AuditState {
    chains: HashMap<OrganizationId, Vec<AuditEntry>>,
    merges: HashMap<MergeLogId, (OrganizationId, usize)>,
    undos: HashMap<MergeLogId, (OrganizationId, usize)>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(AuditState::default()),
            read_only: AtomicBool::new(false),
        }
    }

    /// Rebuild a log from previously exported entries, verifying every chain.
    pub fn from_entries(entries: impl IntoIterator<Item = AuditEntry>) -> Result<Self, AuditError> {
        let log = Self::new();
        {
            let mut state = log.write_state()?;
            for entry in entries {
                let org = entry.organization_id();
                let chain = state.chains.entry(org).or_default();
                chain.push(entry);
            }
            let AuditState {
                chains,
                merges,
                undos,
            } = &mut *state;
            for (org, chain) in chains.iter_mut() {
                chain.sort_by_key(AuditEntry::seq);
                for (index, entry) in chain.iter().enumerate() {
                    if let AuditEntry::Merge(m) = entry {
                        if merges.insert(m.id, (*org, index)).is_some() {
                            return Err(AuditError::DuplicateId(m.id));
                        }
                    }
                    // Double undos are reported by chain validation below.
                    if let AuditEntry::Undo(u) = entry {
                        undos.entry(u.merge_log_id).or_insert((*org, index));
                    }
                }
            }
        }
        for org in log.organizations()? {
            log.validate_chain(&org)?;
        }
        Ok(log)
    }

    /// Every entry across all organizations, ordered by organization then
    /// sequence.
    pub fn export(&self) -> Result<Vec<AuditEntry>, AuditError> {
        let mut out = Vec::new();
        for org in self.organizations()? {
            out.extend(self.entries(&org)?);
        }
        Ok(out)
    }

    /// Refuse all further writes.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Fail on the first integrity violation in one organization's chain.
    pub fn validate_chain(&self, organization: &OrganizationId) -> Result<(), AuditError> {
        ChainValidator::validate_organization(self, organization)?.into_result()
    }

    fn ensure_writable(&self) -> Result<(), AuditError> {
        if self.read_only.load(Ordering::SeqCst) {
            Err(AuditError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn chain_position(state: &AuditState, org: &OrganizationId) -> (u64, Option<[u8; 32]>) {
        let chain = state.chains.get(org);
        let seq = chain.map(|c| (c.len() + 1) as u64).unwrap_or(1);
        let prev_hash = chain.and_then(|c| c.last()).map(AuditEntry::entry_hash);
        (seq, prev_hash)
    }

    /// Link an already-hashed entry onto its organization's chain.
    fn push_entry(state: &mut AuditState, entry: AuditEntry) {
        let org = entry.organization_id();
        let chain = state.chains.entry(org).or_default();
        let index = chain.len();
        match &entry {
            AuditEntry::Merge(m) => state.merges.insert(m.id, (org, index)),
            AuditEntry::Undo(u) => state.undos.insert(u.merge_log_id, (org, index)),
        };
        chain.push(entry);
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, AuditState>, AuditError> {
        self.inner.read().map_err(|_| AuditError::IntegrityViolation {
            seq: 0,
            reason: "audit read lock poisoned".into(),
        })
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, AuditState>, AuditError> {
        self.inner.write().map_err(|_| AuditError::IntegrityViolation {
            seq: 0,
            reason: "audit write lock poisoned".into(),
        })
    }

    fn lookup(
        state: &AuditState,
        position: Option<&(OrganizationId, usize)>,
    ) -> Option<AuditEntry> {
        let (org, index) = position?;
        state.chains.get(org)?.get(*index).cloned()
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditWriter for InMemoryAuditLog {
    fn append_merge(
        &self,
        draft: &MergeLogDraft,
        now: DateTime<Utc>,
        undo_window: Duration,
    ) -> Result<MergeLog, AuditError> {
        self.ensure_writable()?;
        let undo_expires_at = now
            .checked_add_signed(undo_window)
            .ok_or(AuditError::UndoWindowOutOfRange(undo_window))?;
        let mut state = self.write_state()?;
        let (seq, prev_hash) = Self::chain_position(&state, &draft.organization_id);

        let mut log = MergeLog {
            id: MergeLogId::new(),
            organization_id: draft.organization_id,
            seq,
            prev_hash,
            entry_hash: [0; 32],
            primary_client_id: draft.primary_client_id,
            secondary_client_ids: draft.secondary_client_ids.clone(),
            performed_by: draft.performed_by,
            field_resolutions: draft.field_resolutions.clone(),
            before_snapshots: draft.before_snapshots.clone(),
            reparenting_counts: draft.reparenting_counts.clone(),
            reparented_rows: draft.reparented_rows.clone(),
            skipped_tables: draft.skipped_tables.clone(),
            tombstoned_client_ids: draft.tombstoned_client_ids.clone(),
            relinked_clients: draft.relinked_clients.clone(),
            resumes: draft.resumes,
            created_at: now,
            undo_expires_at,
        };
        if state.merges.contains_key(&log.id) {
            return Err(AuditError::DuplicateId(log.id));
        }

        log.entry_hash = compute_entry_hash(&AuditEntry::Merge(log.clone()))?;
        Self::push_entry(&mut state, AuditEntry::Merge(log.clone()));
        tracing::debug!(merge_log = %log.id, seq = log.seq, "merge log appended");
        Ok(log)
    }

    fn append_undo(&self, draft: &UndoDraft, now: DateTime<Utc>) -> Result<UndoRecord, AuditError> {
        self.ensure_writable()?;
        let mut state = self.write_state()?;

        let merge = Self::lookup(&state, state.merges.get(&draft.merge_log_id))
            .and_then(|e| e.as_merge().cloned())
            .ok_or(AuditError::MissingMergeLog(draft.merge_log_id))?;
        if state.undos.contains_key(&draft.merge_log_id) {
            return Err(AuditError::AlreadyUndone(draft.merge_log_id));
        }

        let (seq, prev_hash) = Self::chain_position(&state, &merge.organization_id);
        let mut record = UndoRecord {
            merge_log_id: merge.id,
            organization_id: merge.organization_id,
            seq,
            prev_hash,
            entry_hash: [0; 32],
            performed_by: draft.performed_by,
            undone_at: now,
            restored_counts: draft.restored_counts.clone(),
        };

        record.entry_hash = compute_entry_hash(&AuditEntry::Undo(record.clone()))?;
        Self::push_entry(&mut state, AuditEntry::Undo(record.clone()));
        tracing::debug!(merge_log = %record.merge_log_id, seq = record.seq, "undo appended");
        Ok(record)
    }
}

impl AuditReader for InMemoryAuditLog {
    fn merge_log(&self, id: &MergeLogId) -> Result<Option<MergeLog>, AuditError> {
        let state = self.read_state()?;
        Ok(Self::lookup(&state, state.merges.get(id)).and_then(|e| e.as_merge().cloned()))
    }

    fn undo_of(&self, id: &MergeLogId) -> Result<Option<UndoRecord>, AuditError> {
        let state = self.read_state()?;
        Ok(Self::lookup(&state, state.undos.get(id)).and_then(|e| e.as_undo().cloned()))
    }

    fn entries(&self, organization: &OrganizationId) -> Result<Vec<AuditEntry>, AuditError> {
        let state = self.read_state()?;
        Ok(state.chains.get(organization).cloned().unwrap_or_default())
    }

    fn organizations(&self) -> Result<Vec<OrganizationId>, AuditError> {
        let state = self.read_state()?;
        let mut orgs: Vec<OrganizationId> = state.chains.keys().copied().collect();
        orgs.sort();
        Ok(orgs)
    }
}
