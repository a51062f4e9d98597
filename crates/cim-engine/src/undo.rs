//! Reversal of a logged merge inside its undo window.

use std::collections::BTreeMap;

use cim_audit::{MergeLog, UndoDraft};
use cim_gate::GateRequest;
use cim_types::{
    ActorId, BalanceRow, ClientId, ClientSnapshot, ClientStatus, MergeLogId, OrganizationId,
};

use crate::error::{MergeError, MergeResult};
use crate::lease::MergeLease;
use crate::orchestrator::MergeEngine;
use crate::reconcile::add_amounts;
use crate::request::UndoSummary;

/// Balance writes that put one table back the way it was.
struct BalanceRestore {
    label: String,
    table: String,
    primary: BalanceRow,
    secondaries: Vec<BalanceRow>,
}

impl MergeEngine {
    /// Reverse a merge: point recorded rows back at their original clients,
    /// move reconciled balances back, restore tombstoned secondaries, and
    /// revert the primary's resolved fields.
    ///
    /// Only rows still pointing at the primary are reverted, and only balance
    /// rows still zeroed are restored. Secondaries that were already merged
    /// before the logged run stay merged. A run interrupted while tombstoning
    /// can be undone on its own until a later run finishes it; from then on
    /// only the later log can be undone.
    pub fn undo(
        &self,
        actor: &ActorId,
        organization: &OrganizationId,
        merge_log_id: &MergeLogId,
    ) -> MergeResult<UndoSummary> {
        let span = tracing::info_span!("undo", organization = %organization, merge_log = %merge_log_id);
        let _enter = span.enter();

        self.authorize(&GateRequest::undo(*actor, *organization, *merge_log_id))?;
        let log = self.scoped_log(organization, merge_log_id)?;
        if self.audit.undo_of(merge_log_id)?.is_some() {
            return Err(MergeError::Validation(format!(
                "merge {merge_log_id} has already been undone"
            )));
        }
        if let Some(later) = self.finished_by(organization, merge_log_id)? {
            return Err(MergeError::Validation(format!(
                "merge {merge_log_id} was finished by merge {later}; undo that merge instead"
            )));
        }
        let now = self.clock.now();
        if !log.undo_window_open_at(now) {
            return Err(MergeError::Validation(format!(
                "undo window for merge {merge_log_id} closed at {}",
                log.undo_expires_at
            )));
        }

        let primary_snapshot = snapshot_of(&log, &log.primary_client_id)?;
        let restorable = self.check_current_state(&log)?;

        let claims: Vec<(ClientId, ClientStatus)> =
            std::iter::once((log.primary_client_id, ClientStatus::Active))
                .chain(restorable.iter().map(|(s, status)| (s.id(), *status)))
                .collect();
        let mut lease = MergeLease::acquire(&*self.store, &claims)?;
        let restorable: Vec<&ClientSnapshot> = restorable.into_iter().map(|(s, _)| s).collect();

        let balance_plan = self.plan_balance_restore(&log, &restorable)?;

        let mut restored_counts = self.revert_rows(&log);
        for restore in balance_plan {
            let count = self.apply_balance_restore(&restore);
            restored_counts.insert(restore.label, count);
        }

        for snapshot in &restorable {
            let mut record = snapshot.client.clone();
            record.updated_at = now;
            self.store.put_client(&record)?;
            lease.hand_back(&record.id);
        }
        let relinked = self.unlink_relinked(&log);

        let mut primary = self
            .store
            .get_client(&log.primary_client_id)?
            .ok_or(MergeError::ClientNotFound(log.primary_client_id))?;
        log.field_resolutions.restore_from(&primary_snapshot.client, &mut primary);
        primary.status = ClientStatus::Active;
        if !log.field_resolutions.is_empty() {
            primary.updated_at = now;
        }
        self.store.put_client(&primary)?;
        lease.hand_back(&primary.id);
        lease.release();

        let draft = UndoDraft {
            merge_log_id: *merge_log_id,
            performed_by: *actor,
            restored_counts: restored_counts.clone(),
        };
        let record = self.audit.append_undo(&draft, now).map_err(|err| {
            tracing::error!(error = %err, "merge reversed but the undo could not be logged");
            MergeError::AuditWrite(err)
        })?;

        tracing::info!(restored_clients = restorable.len(), relinked, "merge undone");
        Ok(UndoSummary {
            merge_log_id: record.merge_log_id,
            undone_at: record.undone_at,
            restored_counts,
        })
    }

    /// Verify the records still look the way the merge left them and return
    /// each secondary to restore with the status it should be found in:
    /// `merged` into the primary if the run tombstoned it, `active` if the
    /// run stopped before it did.
    fn check_current_state<'l>(
        &self,
        log: &'l MergeLog,
    ) -> MergeResult<Vec<(&'l ClientSnapshot, ClientStatus)>> {
        let primary = self
            .store
            .get_client(&log.primary_client_id)?
            .ok_or(MergeError::ClientNotFound(log.primary_client_id))?;
        match primary.status {
            ClientStatus::Active => {}
            ClientStatus::Merging => {
                return Err(MergeError::Conflict(format!(
                    "client {} is part of another merge in progress",
                    primary.id
                )))
            }
            ClientStatus::Merged => {
                return Err(MergeError::Validation(format!(
                    "client {} has since been merged into another client",
                    primary.id
                )))
            }
        }

        let mut restorable = Vec::new();
        for id in &log.secondary_client_ids {
            let snapshot = snapshot_of(log, id)?;
            if snapshot.client.status != ClientStatus::Active {
                continue;
            }
            let current = self
                .store
                .get_client(id)?
                .ok_or(MergeError::ClientNotFound(*id))?;
            if current.status == ClientStatus::Merging {
                return Err(MergeError::Conflict(format!(
                    "client {id} is part of another merge in progress"
                )));
            }
            if log.tombstoned_client_ids.contains(id) {
                if !current.is_merged_into(&log.primary_client_id) {
                    return Err(MergeError::Validation(format!(
                        "client {id} is no longer merged into {}",
                        log.primary_client_id
                    )));
                }
                restorable.push((snapshot, ClientStatus::Merged));
            } else {
                if current.status != ClientStatus::Active {
                    return Err(MergeError::Validation(format!(
                        "client {id} has since been merged into another client"
                    )));
                }
                restorable.push((snapshot, ClientStatus::Active));
            }
        }
        Ok(restorable)
    }

    /// Point records the merge relinked back at the secondary they were
    /// merged into before. Returns how many moved.
    fn unlink_relinked(&self, log: &MergeLog) -> usize {
        let mut moved = 0;
        for (record, former) in &log.relinked_clients {
            match self.store.relink(record, &log.primary_client_id, former) {
                Ok(true) => moved += 1,
                Ok(false) => {
                    tracing::debug!(client = %record, "merged record changed since merge")
                }
                Err(err) => {
                    tracing::warn!(client = %record, error = %err, "merged record not relinked")
                }
            }
        }
        moved
    }

    /// Work out every balance write before any is made, so a primary that
    /// has spent the moved amounts is rejected up front.
    fn plan_balance_restore(
        &self,
        log: &MergeLog,
        restorable: &[&ClientSnapshot],
    ) -> MergeResult<Vec<BalanceRestore>> {
        let mut plan = Vec::new();
        for (entry, fields) in self.registry.balance_tables() {
            let mut debit: BTreeMap<String, i64> = BTreeMap::new();
            let mut secondaries = Vec::new();

            for snapshot in restorable {
                let Some(before) = snapshot.balances.get(&entry.label) else {
                    continue;
                };
                if fields.iter().all(|f| before.amount(f) == 0) {
                    continue;
                }
                let current = match self.store.read_balance(&entry.table, &snapshot.id()) {
                    Ok(current) => current,
                    Err(err) => {
                        tracing::warn!(table = entry.label.as_str(), error = %err, "balance restore skipped");
                        continue;
                    }
                };
                let mut restored = current.unwrap_or_else(|| BalanceRow::new(snapshot.id()));
                if fields.iter().any(|f| restored.amount(f) != 0) {
                    continue;
                }
                for field in fields {
                    let amount = before.amount(field);
                    let total = debit.entry(field.clone()).or_default();
                    *total = total.saturating_add(amount);
                    restored.amounts.insert(field.clone(), amount);
                }
                secondaries.push(restored);
            }

            if secondaries.is_empty() {
                continue;
            }

            let current = self
                .store
                .read_balance(&entry.table, &log.primary_client_id)?
                .unwrap_or_else(|| BalanceRow::new(log.primary_client_id));
            let primary = add_amounts(&current, &debit, -1)
                .map_err(|reason| MergeError::Validation(reason.to_string()))?;
            if let Some(field) = fields.iter().find(|f| primary.amount(f) < 0) {
                return Err(MergeError::Validation(format!(
                    "{} {field} on the primary has been spent since the merge",
                    entry.label
                )));
            }

            plan.push(BalanceRestore {
                label: entry.label.clone(),
                table: entry.table.clone(),
                primary,
                secondaries,
            });
        }
        Ok(plan)
    }

    fn apply_balance_restore(&self, restore: &BalanceRestore) -> u64 {
        if let Err(err) = self.store.write_balance(&restore.table, &restore.primary) {
            tracing::warn!(table = restore.label.as_str(), error = %err, "primary balance not restored");
            return 0;
        }
        let mut count = 0;
        for row in &restore.secondaries {
            match self.store.write_balance(&restore.table, row) {
                Ok(()) => count += 1,
                Err(err) => tracing::warn!(
                    table = restore.label.as_str(),
                    client = %row.client_id,
                    error = %err,
                    "secondary balance not restored"
                ),
            }
        }
        count
    }

    /// Point every recorded row that still holds the merge's value back at
    /// the value it held before.
    fn revert_rows(&self, log: &MergeLog) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for (label, rows) in &log.reparented_rows {
            let mut reverted = 0;
            for row in rows {
                match self.store.rewrite_reference_if(
                    &row.table,
                    &row.column,
                    row.row_id,
                    &row.written_value,
                    &row.previous_value,
                ) {
                    Ok(true) => reverted += 1,
                    Ok(false) => {
                        tracing::debug!(table = label.as_str(), row = %row.row_id, "row changed since merge")
                    }
                    Err(err) => {
                        tracing::warn!(table = label.as_str(), row = %row.row_id, error = %err, "row not reverted")
                    }
                }
            }
            counts.insert(label.clone(), reverted);
        }
        counts
    }
}

fn snapshot_of<'l>(log: &'l MergeLog, id: &ClientId) -> MergeResult<&'l ClientSnapshot> {
    log.before_snapshots.get(id).ok_or_else(|| {
        MergeError::Audit(cim_audit::AuditError::IntegrityViolation {
            seq: log.seq,
            reason: format!("merge log has no snapshot of client {id}"),
        })
    })
}
