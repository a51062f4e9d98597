use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use cim_audit::{AuditEntry, AuditLog, MergeLog, MergeLogDraft};
use cim_gate::{DenialKind, GateDecision, GateRequest, PermissionGate};
use cim_store::Datastore;
use cim_types::{
    ActorId, ClientId, ClientRecord, ClientSnapshot, ClientStatus, MergeLogId, OrganizationId,
};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{MergeError, MergeResult};
use crate::lease::MergeLease;
use crate::outcome::TableReport;
use crate::reconcile::BalanceReconciler;
use crate::registry::{MergeParties, TableRegistry};
use crate::reparent::ReparentingEngine;
use crate::request::{MergeRequest, MergeState, MergeSummary};
use crate::resolver::FieldResolver;
use crate::snapshot::SnapshotCapturer;
use crate::tombstone::{Tombstoned, TombstoneWriter};

/// The merge orchestrator.
///
/// Sequences gate, snapshot, lease, field resolution, reparenting, balance
/// reconciliation, tombstoning, and the audit log for one request at a time.
/// Every step is its own write against the datastore; nothing spans steps.
///
/// A run that fails while tombstoning is still logged, with the rows it
/// moved. The next run over the same primary finishes it and its log
/// absorbs the interrupted one.
pub struct MergeEngine {
    pub(crate) store: Arc<dyn Datastore>,
    pub(crate) gate: Arc<PermissionGate>,
    pub(crate) audit: Arc<dyn AuditLog>,
    pub(crate) registry: TableRegistry,
    pub(crate) config: EngineConfig,
    pub(crate) clock: Arc<dyn Clock>,
}

impl MergeEngine {
    /// Create an engine with the default registry, configuration, and the
    /// system clock.
    pub fn new(
        store: Arc<dyn Datastore>,
        gate: Arc<PermissionGate>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            store,
            gate,
            audit,
            registry: TableRegistry::salon_default(),
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: TableRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    /// Merge the request's secondaries into its primary on behalf of `actor`.
    ///
    /// Errors at or before field resolution leave every record as it was.
    /// Table-level failures after that are skipped and reported in the
    /// summary. An `AuditWrite` error means the merge itself committed. A
    /// `Tombstone` error means the moved rows and balances are committed and
    /// logged; rerunning the request finishes the merge.
    pub fn merge(&self, actor: &ActorId, request: &MergeRequest) -> MergeResult<MergeSummary> {
        let span = tracing::info_span!(
            "merge",
            organization = %request.organization_id,
            primary = %request.primary_client_id,
            secondaries = request.secondary_client_ids.len(),
        );
        let _enter = span.enter();

        let mut states = vec![MergeState::Start];
        match self.run_merge(actor, request, &mut states) {
            Ok(summary) => Ok(summary),
            Err(err @ MergeError::AuditWrite(_)) => Err(err),
            Err(err) => {
                let reached = states.last().copied().unwrap_or(MergeState::Start);
                tracing::info!(state = %reached, error = %err, "merge aborted");
                Err(err)
            }
        }
    }

    fn run_merge(
        &self,
        actor: &ActorId,
        request: &MergeRequest,
        states: &mut Vec<MergeState>,
    ) -> MergeResult<MergeSummary> {
        let org = request.organization_id;
        let primary_id = request.primary_client_id;

        self.authorize(&GateRequest::merge(
            *actor,
            org,
            primary_id,
            request.secondary_client_ids.clone(),
        ))?;
        request
            .field_resolutions
            .validate()
            .map_err(|e| MergeError::Validation(e.to_string()))?;
        let undo_window = self.config.undo_window()?;
        states.push(MergeState::Authorized);

        let snapshots = SnapshotCapturer::new(&*self.store, &self.registry)
            .enforce_tenant_isolation(self.config.enforce_tenant_isolation)
            .capture(&org, &primary_id, &request.secondary_client_ids)?;
        states.push(MergeState::Snapshotted);

        let plan = MergePlan::from_snapshots(&primary_id, &request.secondary_client_ids, &snapshots)?;
        let resumed = self.interrupted_run(&org, &primary_id, &plan.to_tombstone)?;
        let mut lease = MergeLease::acquire(&*self.store, &plan.claims())?;

        let now = self.clock.now();
        let resolved = FieldResolver::new(&*self.store)
            .apply(&primary_id, &request.field_resolutions, now)?;
        states.push(MergeState::FieldsResolved);

        let primary = resolved.unwrap_or_else(|| plan.primary.clone());
        let parties = MergeParties::new(&primary, &plan.secondaries);

        let mut report = ReparentingEngine::new(&*self.store).run(&self.registry, &parties);
        states.push(MergeState::Reparented);

        report.extend(BalanceReconciler::new(&*self.store).run(&self.registry, &parties));
        states.push(MergeState::Reconciled);

        let mut done = Tombstoned::default();
        let tombstoned = TombstoneWriter::new(&*self.store).write(
            &mut lease,
            &primary_id,
            &plan.to_tombstone,
            actor,
            now,
            &mut done,
        );
        lease.release();
        if tombstoned.is_ok() {
            states.push(MergeState::Tombstoned);
        }

        let mut draft = MergeLogDraft {
            organization_id: org,
            primary_client_id: primary_id,
            secondary_client_ids: request.secondary_client_ids.clone(),
            performed_by: *actor,
            field_resolutions: request.field_resolutions.clone(),
            before_snapshots: snapshots,
            reparenting_counts: report.counts.clone(),
            reparented_rows: report.rows.clone(),
            skipped_tables: report.skipped_descriptions(),
            tombstoned_client_ids: done.clients,
            relinked_clients: done.relinked,
            resumes: None,
        };
        if let Some(earlier) = &resumed {
            absorb_interrupted(&mut draft, earlier);
        }

        let logged = self.audit.append_merge(&draft, now, undo_window);
        let log = match (tombstoned, logged) {
            (Ok(()), Ok(log)) => log,
            (Ok(()), Err(err)) => {
                tracing::error!(
                    error = %err,
                    "merge committed but its audit log could not be written"
                );
                return Err(MergeError::AuditWrite(err));
            }
            (Err(err), Ok(log)) => {
                tracing::warn!(
                    merge_log = %log.id,
                    error = %err,
                    "merge interrupted while tombstoning; rerun it to finish"
                );
                return Err(err);
            }
            (Err(err), Err(audit)) => {
                tracing::error!(
                    error = %audit,
                    "interrupted merge could not be logged"
                );
                return Err(err);
            }
        };
        states.push(MergeState::Logged);

        tracing::info!(
            merge_log = %log.id,
            tombstoned = plan.to_tombstone.len(),
            relinked = log.relinked_clients.len(),
            resumes = ?log.resumes,
            rows = log.total_reparented(),
            skipped = report.skipped.len(),
            "merge complete"
        );

        Ok(summarize(log.id, report, plan.already_merged, std::mem::take(states)))
    }

    /// The latest logged run over `primary` that stopped before tombstoning
    /// one of `secondaries` and has been neither undone nor finished since.
    fn interrupted_run(
        &self,
        organization: &OrganizationId,
        primary: &ClientId,
        secondaries: &[ClientId],
    ) -> MergeResult<Option<MergeLog>> {
        if secondaries.is_empty() {
            return Ok(None);
        }
        let entries = self.audit.entries(organization)?;
        let settled: HashSet<MergeLogId> = entries
            .iter()
            .filter_map(|entry| match entry {
                AuditEntry::Undo(undo) => Some(undo.merge_log_id),
                AuditEntry::Merge(log) => log.resumes,
            })
            .collect();
        Ok(entries
            .iter()
            .rev()
            .filter_map(AuditEntry::as_merge)
            .find(|log| {
                log.primary_client_id == *primary
                    && !settled.contains(&log.id)
                    && log
                        .pending_secondaries()
                        .iter()
                        .any(|id| secondaries.contains(id))
            })
            .cloned())
    }

    /// The later run that finished `id`, if one did.
    pub(crate) fn finished_by(
        &self,
        organization: &OrganizationId,
        id: &MergeLogId,
    ) -> MergeResult<Option<MergeLogId>> {
        Ok(self
            .audit
            .entries(organization)?
            .iter()
            .filter_map(AuditEntry::as_merge)
            .find(|log| log.resumes.as_ref() == Some(id))
            .map(|log| log.id))
    }

    /// Read one merge log, scoped to `organization`.
    pub fn merge_log(
        &self,
        actor: &ActorId,
        organization: &OrganizationId,
        id: &MergeLogId,
    ) -> MergeResult<MergeLog> {
        self.authorize(&GateRequest::read_log(*actor, *organization, *id))?;
        self.scoped_log(organization, id)
    }

    pub(crate) fn scoped_log(
        &self,
        organization: &OrganizationId,
        id: &MergeLogId,
    ) -> MergeResult<MergeLog> {
        match self.audit.merge_log(id)? {
            Some(log) if log.organization_id == *organization => Ok(log),
            _ => Err(MergeError::MergeLogNotFound(*id)),
        }
    }

    pub(crate) fn authorize(&self, request: &GateRequest) -> MergeResult<()> {
        let result = self.gate.evaluate(request)?;
        match result.decision {
            GateDecision::Allowed => Ok(()),
            GateDecision::Denied {
                kind: DenialKind::Invalid,
                reason,
            } => Err(MergeError::Validation(reason)),
            GateDecision::Denied {
                kind: DenialKind::Forbidden,
                reason,
            } => Err(MergeError::Forbidden(reason)),
        }
    }
}

/// Fold an interrupted run into the log of the run finishing it, so undoing
/// the later log reverses both.
fn absorb_interrupted(draft: &mut MergeLogDraft, earlier: &MergeLog) {
    for (id, snapshot) in &earlier.before_snapshots {
        draft.before_snapshots.insert(*id, snapshot.clone());
    }
    for id in &earlier.secondary_client_ids {
        if !draft.secondary_client_ids.contains(id) {
            draft.secondary_client_ids.push(*id);
        }
    }
    draft.field_resolutions = earlier.field_resolutions.combined_with(&draft.field_resolutions);
    for (label, rows) in &earlier.reparented_rows {
        draft
            .reparented_rows
            .entry(label.clone())
            .or_default()
            .extend(rows.iter().cloned());
    }
    let mut tombstoned = earlier.tombstoned_client_ids.clone();
    tombstoned.append(&mut draft.tombstoned_client_ids);
    draft.tombstoned_client_ids = tombstoned;
    for (record, from) in &earlier.relinked_clients {
        draft.relinked_clients.entry(*record).or_insert(*from);
    }
    draft.resumes = Some(earlier.id);
}

fn summarize(
    merge_log_id: MergeLogId,
    report: TableReport,
    already_merged: Vec<ClientId>,
    states: Vec<MergeState>,
) -> MergeSummary {
    let skipped_tables = report.skipped_descriptions();
    MergeSummary {
        merge_log_id,
        reparenting_counts: report.counts,
        skipped_tables,
        already_merged,
        states,
    }
}

/// Which records a merge locks and tombstones, decided from their snapshots.
struct MergePlan {
    primary: ClientRecord,
    /// Every secondary record, in request order.
    secondaries: Vec<ClientRecord>,
    /// Active secondaries this run will tombstone.
    to_tombstone: Vec<ClientId>,
    /// Secondaries a previous run already merged into the primary.
    already_merged: Vec<ClientId>,
}

impl MergePlan {
    fn from_snapshots(
        primary: &ClientId,
        secondaries: &[ClientId],
        snapshots: &BTreeMap<ClientId, ClientSnapshot>,
    ) -> MergeResult<Self> {
        let record = |id: &ClientId| {
            snapshots
                .get(id)
                .map(|s| s.client.clone())
                .ok_or(MergeError::ClientNotFound(*id))
        };

        let primary = record(primary)?;
        match primary.status {
            ClientStatus::Active => {}
            ClientStatus::Merging => {
                return Err(MergeError::Conflict(format!(
                    "client {} is part of another merge in progress",
                    primary.id
                )));
            }
            ClientStatus::Merged => {
                return Err(MergeError::Validation(format!(
                    "primary client {} has itself been merged",
                    primary.id
                )));
            }
        }

        let mut plan = Self {
            primary,
            secondaries: Vec::with_capacity(secondaries.len()),
            to_tombstone: Vec::new(),
            already_merged: Vec::new(),
        };
        for id in secondaries {
            let secondary = record(id)?;
            match secondary.status {
                ClientStatus::Active => plan.to_tombstone.push(*id),
                ClientStatus::Merged if secondary.is_merged_into(&plan.primary.id) => {
                    plan.already_merged.push(*id)
                }
                ClientStatus::Merged => {
                    return Err(MergeError::Validation(format!(
                        "client {id} has already been merged into another client"
                    )));
                }
                ClientStatus::Merging => {
                    return Err(MergeError::Conflict(format!(
                        "client {id} is part of another merge in progress"
                    )));
                }
            }
            plan.secondaries.push(secondary);
        }
        Ok(plan)
    }

    fn claims(&self) -> Vec<(ClientId, ClientStatus)> {
        std::iter::once(self.primary.id)
            .chain(self.to_tombstone.iter().copied())
            .map(|id| (id, ClientStatus::Active))
            .collect()
    }
}
