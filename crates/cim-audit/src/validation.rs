use std::collections::HashSet;

use cim_types::OrganizationId;

use crate::error::AuditError;
use crate::records::AuditEntry;
use crate::traits::AuditReader;

const HASH_DOMAIN: &[u8] = b"cim-audit-v1:";

/// Result of validating one organization's audit chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationReport {
    pub organization_id: OrganizationId,
    pub entry_count: u64,
    pub merge_count: u64,
    pub undo_count: u64,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    /// Returns `true` if all checks passed.
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// The first violation as an error, if any.
    pub fn into_result(self) -> Result<(), AuditError> {
        match self.violations.into_iter().next() {
            None => Ok(()),
            Some(v) => Err(AuditError::IntegrityViolation {
                seq: v.seq,
                reason: v.description,
            }),
        }
    }
}

/// A specific integrity violation detected during validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub seq: u64,
    pub kind: ViolationKind,
    pub description: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    SequenceGap,
    HashChainBreak,
    HashMismatch,
    ForeignEntry,
    UnattributedUndo,
    RepeatedUndo,
}

/// Audit chain integrity validator.
pub struct ChainValidator;

impl ChainValidator {
    /// Validate one organization's chain: sequence, hash links, entry hashes,
    /// and that every undo follows exactly one earlier merge.
    pub fn validate_organization<R: AuditReader + ?Sized>(
        reader: &R,
        organization: &OrganizationId,
    ) -> Result<ValidationReport, AuditError> {
        let entries = reader.entries(organization)?;
        Ok(Self::validate_entries(organization, &entries))
    }

    /// Validate every organization the reader knows about.
    pub fn validate_all<R: AuditReader + ?Sized>(
        reader: &R,
    ) -> Result<Vec<ValidationReport>, AuditError> {
        reader
            .organizations()?
            .iter()
            .map(|org| Self::validate_organization(reader, org))
            .collect()
    }

    pub fn validate_entries(organization: &OrganizationId, entries: &[AuditEntry]) -> ValidationReport {
        let mut violations = Vec::new();
        let mut merges = HashSet::new();
        let mut undone = HashSet::new();
        let mut merge_count = 0;
        let mut undo_count = 0;

        for (index, entry) in entries.iter().enumerate() {
            let seq = entry.seq();
            let expected_seq = (index + 1) as u64;
            if seq != expected_seq {
                violations.push(Violation {
                    seq,
                    kind: ViolationKind::SequenceGap,
                    description: format!("expected seq {expected_seq}, got {seq}"),
                });
            }

            let expected_prev = index.checked_sub(1).map(|i| entries[i].entry_hash());
            if entry.prev_hash() != expected_prev {
                violations.push(Violation {
                    seq,
                    kind: ViolationKind::HashChainBreak,
                    description: "previous hash link mismatch".into(),
                });
            }

            if let Ok(h) = compute_entry_hash(entry) {
                if h != entry.entry_hash() {
                    violations.push(Violation {
                        seq,
                        kind: ViolationKind::HashMismatch,
                        description: "entry hash does not match computed".into(),
                    });
                }
            }

            if entry.organization_id() != *organization {
                violations.push(Violation {
                    seq,
                    kind: ViolationKind::ForeignEntry,
                    description: "entry belongs to another organization".into(),
                });
            }

            match entry {
                AuditEntry::Merge(m) => {
                    merge_count += 1;
                    merges.insert(m.id);
                }
                AuditEntry::Undo(u) => {
                    undo_count += 1;
                    if !merges.contains(&u.merge_log_id) {
                        violations.push(Violation {
                            seq,
                            kind: ViolationKind::UnattributedUndo,
                            description: "undo references no earlier merge".into(),
                        });
                    } else if !undone.insert(u.merge_log_id) {
                        violations.push(Violation {
                            seq,
                            kind: ViolationKind::RepeatedUndo,
                            description: "merge undone more than once".into(),
                        });
                    }
                }
            }
        }

        ValidationReport {
            organization_id: *organization,
            entry_count: entries.len() as u64,
            merge_count,
            undo_count,
            violations,
        }
    }
}

/// Domain-separated blake3 hash of an entry with its own hash zeroed.
pub fn compute_entry_hash(entry: &AuditEntry) -> Result<[u8; 32], AuditError> {
    let mut canonical = entry.clone();
    canonical.set_entry_hash([0; 32]);

    let encoded =
        serde_json::to_vec(&canonical).map_err(|e| AuditError::Serialization(e.to_string()))?;

    let mut hasher = blake3::Hasher::new();
    hasher.update(HASH_DOMAIN);
    hasher.update(&encoded);
    Ok(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, Utc};
    use cim_types::{ActorId, ClientId, FieldResolutions, MergeLogId};

    use super::*;
    use crate::memory::InMemoryAuditLog;
    use crate::records::{MergeLogDraft, UndoDraft};
    use crate::traits::AuditWriter;

    fn draft(org: OrganizationId) -> MergeLogDraft {
        MergeLogDraft {
            organization_id: org,
            primary_client_id: ClientId::new(),
            secondary_client_ids: vec![ClientId::new()],
            performed_by: ActorId::new(),
            field_resolutions: FieldResolutions::default(),
            before_snapshots: BTreeMap::new(),
            reparenting_counts: BTreeMap::new(),
            reparented_rows: BTreeMap::new(),
            skipped_tables: BTreeMap::new(),
            tombstoned_client_ids: Vec::new(),
            relinked_clients: BTreeMap::new(),
            resumes: None,
        }
    }

    #[test]
    fn healthy_chain_reports_counts() {
        let log = InMemoryAuditLog::new();
        let org = OrganizationId::new();
        let m = log.append_merge(&draft(org), Utc::now(), Duration::days(7)).unwrap();
        log.append_merge(&draft(org), Utc::now(), Duration::days(7)).unwrap();
        log.append_undo(
            &UndoDraft {
                merge_log_id: m.id,
                performed_by: ActorId::new(),
                restored_counts: BTreeMap::new(),
            },
            Utc::now(),
        )
        .unwrap();

        let report = ChainValidator::validate_organization(&log, &org).unwrap();
        assert!(report.is_valid());
        assert_eq!(report.entry_count, 3);
        assert_eq!(report.merge_count, 2);
        assert_eq!(report.undo_count, 1);
    }

    #[test]
    fn reordered_entries_break_sequence_and_links() {
        let log = InMemoryAuditLog::new();
        let org = OrganizationId::new();
        log.append_merge(&draft(org), Utc::now(), Duration::days(7)).unwrap();
        log.append_merge(&draft(org), Utc::now(), Duration::days(7)).unwrap();

        let mut entries = log.entries(&org).unwrap();
        entries.swap(0, 1);
        let report = ChainValidator::validate_entries(&org, &entries);
        assert!(!report.is_valid());
        let kinds: Vec<_> = report.violations.iter().map(|v| v.kind).collect();
        assert!(kinds.contains(&ViolationKind::SequenceGap));
        assert!(kinds.contains(&ViolationKind::HashChainBreak));
    }

    #[test]
    fn undo_without_merge_is_unattributed() {
        let log = InMemoryAuditLog::new();
        let org = OrganizationId::new();
        let m = log.append_merge(&draft(org), Utc::now(), Duration::days(7)).unwrap();
        log.append_undo(
            &UndoDraft {
                merge_log_id: m.id,
                performed_by: ActorId::new(),
                restored_counts: BTreeMap::new(),
            },
            Utc::now(),
        )
        .unwrap();

        let mut entries = log.entries(&org).unwrap();
        if let AuditEntry::Undo(u) = &mut entries[1] {
            u.merge_log_id = MergeLogId::new();
        }
        let report = ChainValidator::validate_entries(&org, &entries);
        let kinds: Vec<_> = report.violations.iter().map(|v| v.kind).collect();
        assert!(kinds.contains(&ViolationKind::UnattributedUndo));
        assert!(kinds.contains(&ViolationKind::HashMismatch));
        assert!(report.into_result().is_err());
    }

    #[test]
    fn hash_is_independent_of_stored_hash() {
        let log = InMemoryAuditLog::new();
        let org = OrganizationId::new();
        log.append_merge(&draft(org), Utc::now(), Duration::days(7)).unwrap();
        let mut entry = log.entries(&org).unwrap().remove(0);
        let original = compute_entry_hash(&entry).unwrap();
        entry.set_entry_hash([7; 32]);
        assert_eq!(compute_entry_hash(&entry).unwrap(), original);
    }
}
