//! Client identity merge engine.
//!
//! Folds one or more duplicate client records (secondaries) into a single
//! canonical record (the primary) within one organization. A merge runs as a
//! fixed sequence of independently committed steps against a datastore that
//! offers no multi-table transaction:
//!
//! 1. **Gate** -- the actor's merge permission, then structural validation.
//! 2. **Snapshot** -- full pre-merge state of every involved client.
//! 3. **Lease** -- compare-and-set of every record to `merging`.
//! 4. **Field resolution** -- caller-chosen winning values land on the primary.
//! 5. **Reparenting** -- every dependent table in the [`TableRegistry`] is
//!    pointed at the primary. A failing table is skipped, not fatal.
//! 6. **Balance reconciliation** -- additive balances move onto the primary.
//! 7. **Tombstoning** -- secondaries are marked `merged` and linked. Records
//!    earlier merged into a secondary are re-pointed at the primary.
//! 8. **Audit** -- a hash-chained merge log with the snapshots and the exact
//!    rows changed, which [`MergeEngine::undo`] replays in reverse.
//!
//! Rerunning a merge that partially committed finishes it: secondaries
//! already tombstoned into the same primary are swept again and every other
//! step finds nothing left to move. A run that failed while tombstoning is
//! logged anyway, and the run that finishes it carries its changes forward so
//! one undo reverses both.

pub mod clock;
pub mod config;
pub mod error;
pub mod lease;
pub mod orchestrator;
pub mod outcome;
pub mod reconcile;
pub mod registry;
pub mod reparent;
pub mod request;
pub mod resolver;
pub mod snapshot;
pub mod tombstone;
mod undo;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{MergeError, MergeErrorKind, MergeResult};
pub use lease::MergeLease;
pub use orchestrator::MergeEngine;
pub use outcome::{SkipReason, TableOutcome, TableReport};
pub use reconcile::BalanceReconciler;
pub use registry::{CustomMerge, DependentTable, KeyKind, MergeParties, MergeStrategy, TableRegistry};
pub use reparent::{reparent_column, DualColumnMerge, ReparentingEngine};
pub use request::{MergeRequest, MergeState, MergeSummary, UndoSummary};
pub use resolver::FieldResolver;
pub use snapshot::SnapshotCapturer;
pub use tombstone::{Tombstoned, TombstoneWriter};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use cim_audit::{AuditReader, InMemoryAuditLog, MergeLog};
    use cim_gate::{GateConfig, InMemoryRoleDirectory, PermissionGate, RoleGrant};
    use cim_store::{BalanceStore, ClientStore, Fault, InMemoryDatastore};
    use cim_types::{
        ActorId, BalanceRow, ClientId, ClientRecord, ClientStatus, FieldResolutions,
        OrganizationId,
    };

    use super::*;

    struct Salon {
        store: Arc<InMemoryDatastore>,
        audit: Arc<InMemoryAuditLog>,
        clock: Arc<ManualClock>,
        engine: MergeEngine,
        org: OrganizationId,
        owner: ActorId,
        primary: ClientRecord,
        secondaries: Vec<ClientRecord>,
    }

    impl Salon {
        fn client(&self, id: &ClientId) -> ClientRecord {
            self.store.get_client(id).unwrap().unwrap()
        }

        fn credit(&self, id: &ClientId) -> i64 {
            self.store
                .read_balance("client_balances", id)
                .unwrap()
                .map(|row| row.amount("salon_credit_balance"))
                .unwrap_or(0)
        }

        fn appointments_of(&self, id: &ClientId) -> usize {
            self.store
                .count_references("appointments", "client_id", &id.to_string())
                .unwrap()
        }

        fn request(&self) -> MergeRequest {
            MergeRequest::new(
                self.org,
                self.primary.id,
                self.secondaries.iter().map(|c| c.id).collect(),
            )
        }

        fn log_count(&self) -> usize {
            self.audit.entries(&self.org).unwrap().len()
        }

        fn merge_logs(&self) -> Vec<MergeLog> {
            self.audit
                .entries(&self.org)
                .unwrap()
                .iter()
                .filter_map(|e| e.as_merge().cloned())
                .collect()
        }
    }

    /// Helper: primary P (credit 10, one appointment), S1 (credit 5, three
    /// appointments), S2 (credit 0), and an owner allowed to merge.
    fn salon() -> Salon {
        let org = OrganizationId::new();
        let owner = ActorId::new();
        let store = Arc::new(InMemoryDatastore::new());
        store.create_table("appointments", ["client_id", "service"]).unwrap();
        store
            .create_balance_table("client_balances", ["salon_credit_balance", "gift_card_balance"])
            .unwrap();

        let primary = ClientRecord::new(org, "Maria", "Lopez").with_email("maria@old.example");
        let s1 = ClientRecord::new(org, "Maria", "L.").with_phone("555-0101");
        let s2 = ClientRecord::new(org, "M.", "Lopez");
        for client in [&primary, &s1, &s2] {
            store.put_client(client).unwrap();
        }
        for (client, credit) in [(&primary, 10), (&s1, 5), (&s2, 0)] {
            store
                .write_balance(
                    "client_balances",
                    &BalanceRow::new(client.id).with_amount("salon_credit_balance", credit),
                )
                .unwrap();
        }
        store
            .insert_row("appointments", [("client_id", Some(primary.id.to_string()))])
            .unwrap();
        for service in ["cut", "color", "blowout"] {
            store
                .insert_row(
                    "appointments",
                    [
                        ("client_id", Some(s1.id.to_string())),
                        ("service", Some(service.to_string())),
                    ],
                )
                .unwrap();
        }

        let directory = InMemoryRoleDirectory::from_grants([RoleGrant::scoped(
            owner,
            org,
            "owner",
            &["clients.merge"],
        )]);
        let gate = Arc::new(PermissionGate::with_default_stages(
            GateConfig::default(),
            Arc::new(directory),
        ));
        let audit = Arc::new(InMemoryAuditLog::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = MergeEngine::new(store.clone(), gate, audit.clone()).with_clock(clock.clone());

        Salon {
            store,
            audit,
            clock,
            engine,
            org,
            owner,
            primary,
            secondaries: vec![s1, s2],
        }
    }

    #[test]
    fn balances_are_summed_onto_the_primary() {
        let s = salon();
        s.engine.merge(&s.owner, &s.request()).unwrap();

        assert_eq!(s.credit(&s.primary.id), 15);
        for secondary in &s.secondaries {
            assert_eq!(s.credit(&secondary.id), 0);
            let record = s.client(&secondary.id);
            assert_eq!(record.status, ClientStatus::Merged);
            assert!(record.is_merged_into(&s.primary.id));
            assert_eq!(record.merged_by, Some(s.owner));
        }
        assert_eq!(s.client(&s.primary.id).status, ClientStatus::Active);
    }

    #[test]
    fn appointments_follow_the_primary() {
        let s = salon();
        let request = MergeRequest::new(s.org, s.primary.id, vec![s.secondaries[0].id]);
        let summary = s.engine.merge(&s.owner, &request).unwrap();

        assert_eq!(summary.reparenting_counts.get("appointments"), Some(&3));
        assert_eq!(s.appointments_of(&s.primary.id), 4);
        assert_eq!(s.appointments_of(&s.secondaries[0].id), 0);
    }

    #[test]
    fn unknown_secondary_changes_nothing() {
        let s = salon();
        let before = s.store.to_fixture().unwrap();
        let mut request = s.request();
        request.secondary_client_ids.push(ClientId::new());

        let err = s.engine.merge(&s.owner, &request).unwrap_err();
        assert_eq!(err.kind(), MergeErrorKind::NotFound);
        assert_eq!(s.store.to_fixture().unwrap(), before);
        assert_eq!(s.log_count(), 0);
    }

    #[test]
    fn summary_trails_every_state() {
        let s = salon();
        let summary = s.engine.merge(&s.owner, &s.request()).unwrap();
        assert_eq!(
            summary.states,
            vec![
                MergeState::Start,
                MergeState::Authorized,
                MergeState::Snapshotted,
                MergeState::FieldsResolved,
                MergeState::Reparented,
                MergeState::Reconciled,
                MergeState::Tombstoned,
                MergeState::Logged,
            ]
        );
        assert!(summary.already_merged.is_empty());
    }

    #[test]
    fn merge_log_holds_pre_merge_state() {
        let s = salon();
        let summary = s.engine.merge(&s.owner, &s.request()).unwrap();
        assert_eq!(s.log_count(), 1);

        let log = s.engine.merge_log(&s.owner, &s.org, &summary.merge_log_id).unwrap();
        assert_eq!(log.performed_by, s.owner);
        assert_eq!(log.before_snapshots.len(), 3);
        assert_eq!(log.before_snapshots[&s.primary.id].client, s.primary);
        assert_eq!(log.before_snapshots[&s.secondaries[0].id].client, s.secondaries[0]);
        assert_eq!(
            log.before_snapshots[&s.secondaries[0].id].balance("client_balances", "salon_credit_balance"),
            5
        );
        assert_eq!(log.reparented_rows["appointments"].len(), 3);
        assert_eq!(log.undo_expires_at, log.created_at + Duration::hours(168));
        s.audit.validate_chain(&s.org).unwrap();
    }

    #[test]
    fn field_resolutions_land_on_the_primary() {
        let s = salon();
        let resolutions = FieldResolutions {
            email: Some("maria@new.example".into()),
            phone: Some("555-0101".into()),
            ..Default::default()
        };
        s.engine
            .merge(&s.owner, &s.request().with_resolutions(resolutions))
            .unwrap();

        let primary = s.client(&s.primary.id);
        assert_eq!(primary.email.as_deref(), Some("maria@new.example"));
        assert_eq!(primary.phone.as_deref(), Some("555-0101"));
        assert_eq!(primary.first_name, "Maria");
    }

    #[test]
    fn rerun_after_completion_moves_nothing() {
        let s = salon();
        s.engine.merge(&s.owner, &s.request()).unwrap();
        let again = s.engine.merge(&s.owner, &s.request()).unwrap();

        assert_eq!(again.total_reparented(), 0);
        assert_eq!(again.already_merged.len(), 2);
        assert_eq!(s.credit(&s.primary.id), 15);
        assert_eq!(s.appointments_of(&s.primary.id), 4);
        assert_eq!(s.log_count(), 2);
    }

    #[test]
    fn rerun_finishes_an_interrupted_merge() {
        let s = salon();
        s.store.inject(Fault::Tombstone);
        let err = s.engine.merge(&s.owner, &s.request()).unwrap_err();
        assert!(matches!(err, MergeError::Tombstone(_)));
        // Reparenting and reconciliation committed; statuses were released.
        assert_eq!(s.appointments_of(&s.primary.id), 4);
        assert_eq!(s.client(&s.secondaries[0].id).status, ClientStatus::Active);
        let interrupted = s.merge_logs().remove(0);
        assert!(interrupted.is_interrupted());
        assert_eq!(interrupted.reparented_rows["appointments"].len(), 3);

        s.store.clear_faults();
        let summary = s.engine.merge(&s.owner, &s.request()).unwrap();
        assert_eq!(summary.reparenting_counts.get("appointments"), Some(&0));
        assert_eq!(s.credit(&s.primary.id), 15);
        assert!(s.client(&s.secondaries[0].id).is_merged_into(&s.primary.id));

        let finished = s.engine.merge_log(&s.owner, &s.org, &summary.merge_log_id).unwrap();
        assert_eq!(finished.resumes, Some(interrupted.id));
        assert!(!finished.is_interrupted());
        assert_eq!(s.log_count(), 2);
    }

    #[test]
    fn undo_of_a_finished_interrupted_merge_restores_both_runs() {
        let s = salon();
        s.store.inject(Fault::Tombstone);
        s.engine.merge(&s.owner, &s.request()).unwrap_err();
        let interrupted = s.merge_logs().remove(0).id;
        s.store.clear_faults();
        let finished = s.engine.merge(&s.owner, &s.request()).unwrap();

        let err = s.engine.undo(&s.owner, &s.org, &interrupted).unwrap_err();
        assert_eq!(err.kind(), MergeErrorKind::Validation);

        let undone = s.engine.undo(&s.owner, &s.org, &finished.merge_log_id).unwrap();
        assert_eq!(undone.restored_counts.get("appointments"), Some(&3));
        assert_eq!(undone.restored_counts.get("client_balances"), Some(&1));
        assert_eq!(s.credit(&s.primary.id), 10);
        assert_eq!(s.credit(&s.secondaries[0].id), 5);
        assert_eq!(s.appointments_of(&s.secondaries[0].id), 3);
        assert_eq!(s.appointments_of(&s.primary.id), 1);
        for secondary in &s.secondaries {
            assert_eq!(s.client(&secondary.id).status, ClientStatus::Active);
        }
        s.audit.validate_chain(&s.org).unwrap();
    }

    #[test]
    fn interrupted_merge_can_be_undone_on_its_own() {
        let s = salon();
        s.store.inject(Fault::Tombstone);
        s.engine.merge(&s.owner, &s.request()).unwrap_err();
        s.store.clear_faults();
        let interrupted = s.merge_logs().remove(0).id;

        s.engine.undo(&s.owner, &s.org, &interrupted).unwrap();
        assert_eq!(s.credit(&s.primary.id), 10);
        assert_eq!(s.credit(&s.secondaries[0].id), 5);
        assert_eq!(s.appointments_of(&s.secondaries[0].id), 3);
        assert_eq!(s.client(&s.secondaries[0].id).status, ClientStatus::Active);

        // A fresh run starts over instead of resuming the undone one.
        let summary = s.engine.merge(&s.owner, &s.request()).unwrap();
        assert_eq!(summary.reparenting_counts.get("appointments"), Some(&3));
        let log = s.engine.merge_log(&s.owner, &s.org, &summary.merge_log_id).unwrap();
        assert_eq!(log.resumes, None);
    }

    #[test]
    fn records_merged_into_a_secondary_follow_it_to_the_primary() {
        let s = salon();
        let s1 = s.secondaries[0].id;
        let older = ClientRecord::new(s.org, "Maria", "Lopez (old)");
        s.store.put_client(&older).unwrap();
        s.engine
            .merge(&s.owner, &MergeRequest::new(s.org, s1, vec![older.id]))
            .unwrap();
        assert!(s.client(&older.id).is_merged_into(&s1));

        let summary = s
            .engine
            .merge(&s.owner, &MergeRequest::new(s.org, s.primary.id, vec![s1]))
            .unwrap();
        let relinked = s.client(&older.id);
        assert!(relinked.is_merged_into(&s.primary.id));
        let target = s.client(&relinked.merged_into_client_id.unwrap());
        assert_eq!(target.status, ClientStatus::Active);
        let log = s.engine.merge_log(&s.owner, &s.org, &summary.merge_log_id).unwrap();
        assert_eq!(log.relinked_clients.get(&older.id), Some(&s1));

        s.engine.undo(&s.owner, &s.org, &summary.merge_log_id).unwrap();
        assert_eq!(s.client(&s1).status, ClientStatus::Active);
        assert!(s.client(&older.id).is_merged_into(&s1));
    }

    #[test]
    fn identical_rerun_leaves_the_primary_row_alone() {
        let s = salon();
        let request = s.request().with_resolutions(FieldResolutions {
            email: Some("maria@new.example".into()),
            ..Default::default()
        });
        s.engine.merge(&s.owner, &request).unwrap();
        let after_first = s.client(&s.primary.id);
        assert_eq!(after_first.updated_at, s.clock.now());

        s.clock.advance(Duration::minutes(5));
        s.engine.merge(&s.owner, &request).unwrap();
        assert_eq!(s.client(&s.primary.id), after_first);
    }

    #[test]
    fn unusable_undo_window_fails_before_any_change() {
        let s = salon();
        let before = s.store.to_fixture().unwrap();
        let engine = MergeEngine::new(s.store.clone(), s.engine.gate.clone(), s.audit.clone())
            .with_config(EngineConfig {
                undo_window_hours: i64::MAX,
                ..EngineConfig::default()
            });

        let err = engine.merge(&s.owner, &s.request()).unwrap_err();
        assert!(matches!(err, MergeError::Config(_)));
        assert_eq!(s.store.to_fixture().unwrap(), before);
        assert_eq!(s.log_count(), 0);
    }

    #[test]
    fn malformed_request_without_permission_is_forbidden() {
        let s = salon();
        let request = s.request().with_resolutions(FieldResolutions {
            email: Some("not-an-address".into()),
            ..Default::default()
        });
        let err = s.engine.merge(&ActorId::new(), &request).unwrap_err();
        assert_eq!(err.kind(), MergeErrorKind::Authorization);

        let empty = MergeRequest::new(s.org, s.primary.id, vec![]);
        let err = s.engine.merge(&ActorId::new(), &empty).unwrap_err();
        assert_eq!(err.kind(), MergeErrorKind::Authorization);
    }

    #[test]
    fn actor_without_permission_changes_nothing() {
        let s = salon();
        let before = s.store.to_fixture().unwrap();
        let err = s.engine.merge(&ActorId::new(), &s.request()).unwrap_err();

        assert_eq!(err.kind(), MergeErrorKind::Authorization);
        assert_eq!(s.store.to_fixture().unwrap(), before);
        assert_eq!(s.log_count(), 0);
    }

    #[test]
    fn primary_among_secondaries_is_invalid() {
        let s = salon();
        let request = MergeRequest::new(s.org, s.primary.id, vec![s.primary.id]);
        let err = s.engine.merge(&s.owner, &request).unwrap_err();
        assert_eq!(err.kind(), MergeErrorKind::Validation);
    }

    #[test]
    fn client_of_another_organization_is_not_found() {
        let s = salon();
        let stranger = ClientRecord::new(OrganizationId::new(), "Other", "Salon");
        s.store.put_client(&stranger).unwrap();
        let request = MergeRequest::new(s.org, s.primary.id, vec![stranger.id]);

        let err = s.engine.merge(&s.owner, &request).unwrap_err();
        assert_eq!(err.kind(), MergeErrorKind::NotFound);
        assert_eq!(s.client(&stranger.id).status, ClientStatus::Active);
    }

    #[test]
    fn record_in_another_merge_conflicts() {
        let s = salon();
        s.store
            .compare_and_set_status(&s.secondaries[1].id, ClientStatus::Active, ClientStatus::Merging)
            .unwrap();

        let err = s.engine.merge(&s.owner, &s.request()).unwrap_err();
        assert_eq!(err.kind(), MergeErrorKind::Conflict);
        assert_eq!(s.client(&s.primary.id).status, ClientStatus::Active);
        assert_eq!(s.credit(&s.primary.id), 10);
    }

    #[test]
    fn secondary_merged_elsewhere_is_invalid() {
        let s = salon();
        let other = ClientRecord::new(s.org, "Someone", "Else");
        s.store.put_client(&other).unwrap();
        let first = MergeRequest::new(s.org, other.id, vec![s.secondaries[1].id]);
        s.engine.merge(&s.owner, &first).unwrap();

        let err = s.engine.merge(&s.owner, &s.request()).unwrap_err();
        assert_eq!(err.kind(), MergeErrorKind::Validation);
    }

    #[test]
    fn failed_field_resolution_releases_every_record() {
        let s = salon();
        s.store.inject(Fault::FieldUpdate);
        let request = s.request().with_resolutions(FieldResolutions {
            first_name: Some("Mari".into()),
            ..Default::default()
        });

        let err = s.engine.merge(&s.owner, &request).unwrap_err();
        assert_eq!(err.kind(), MergeErrorKind::Persistence);
        for id in std::iter::once(&s.primary).chain(&s.secondaries).map(|c| c.id) {
            assert_eq!(s.client(&id).status, ClientStatus::Active);
        }
        assert_eq!(s.appointments_of(&s.secondaries[0].id), 3);
        assert_eq!(s.log_count(), 0);
    }

    #[test]
    fn failing_table_is_skipped_and_merge_succeeds() {
        let s = salon();
        s.store.inject(Fault::Table("appointments".into()));
        let summary = s.engine.merge(&s.owner, &s.request()).unwrap();

        assert!(!summary.reparenting_counts.contains_key("appointments"));
        assert!(summary.skipped_tables.contains_key("appointments"));
        // Tables the datastore does not have are skipped too.
        assert!(summary.skipped_tables.contains_key("invoices"));
        assert_eq!(s.credit(&s.primary.id), 15);
        assert!(s.client(&s.secondaries[0].id).is_merged());
    }

    #[test]
    fn unwritable_audit_log_surfaces_after_commit() {
        let s = salon();
        s.audit.set_read_only(true);
        let err = s.engine.merge(&s.owner, &s.request()).unwrap_err();

        assert!(matches!(err, MergeError::AuditWrite(_)));
        assert_eq!(err.kind(), MergeErrorKind::Persistence);
        assert!(s.client(&s.secondaries[0].id).is_merged());
        assert_eq!(s.credit(&s.primary.id), 15);
    }

    #[test]
    fn undo_restores_pre_merge_state() {
        let s = salon();
        let resolutions = FieldResolutions {
            email: Some("maria@new.example".into()),
            ..Default::default()
        };
        let summary = s
            .engine
            .merge(&s.owner, &s.request().with_resolutions(resolutions))
            .unwrap();

        s.clock.advance(Duration::hours(1));
        let undone = s.engine.undo(&s.owner, &s.org, &summary.merge_log_id).unwrap();

        assert_eq!(undone.restored_counts.get("appointments"), Some(&3));
        assert_eq!(undone.restored_counts.get("client_balances"), Some(&1));
        assert_eq!(s.appointments_of(&s.secondaries[0].id), 3);
        assert_eq!(s.appointments_of(&s.primary.id), 1);
        assert_eq!(s.credit(&s.primary.id), 10);
        assert_eq!(s.credit(&s.secondaries[0].id), 5);
        for secondary in &s.secondaries {
            let record = s.client(&secondary.id);
            assert_eq!(record.status, ClientStatus::Active);
            assert_eq!(record.merged_into_client_id, None);
        }
        let primary = s.client(&s.primary.id);
        assert_eq!(primary.email.as_deref(), Some("maria@old.example"));
        assert_eq!(primary.status, ClientStatus::Active);

        assert!(s.audit.undo_of(&summary.merge_log_id).unwrap().is_some());
        s.audit.validate_chain(&s.org).unwrap();
    }

    #[test]
    fn undo_keeps_edits_made_after_the_merge() {
        let s = salon();
        let summary = s.engine.merge(&s.owner, &s.request()).unwrap();
        let mut primary = s.client(&s.primary.id);
        primary.notes = Some("prefers mornings".into());
        s.store.put_client(&primary).unwrap();
        let later = s
            .store
            .insert_row("appointments", [("client_id", Some(s.primary.id.to_string()))])
            .unwrap();

        s.engine.undo(&s.owner, &s.org, &summary.merge_log_id).unwrap();
        assert_eq!(s.client(&s.primary.id).notes.as_deref(), Some("prefers mornings"));
        assert_eq!(
            s.store.row_value("appointments", later, "client_id").unwrap(),
            Some(s.primary.id.to_string())
        );
    }

    #[test]
    fn undo_after_window_is_rejected() {
        let s = salon();
        let summary = s.engine.merge(&s.owner, &s.request()).unwrap();
        s.clock.advance(Duration::hours(169));

        let err = s.engine.undo(&s.owner, &s.org, &summary.merge_log_id).unwrap_err();
        assert_eq!(err.kind(), MergeErrorKind::Validation);
        assert!(s.client(&s.secondaries[0].id).is_merged());
    }

    #[test]
    fn undo_twice_is_rejected() {
        let s = salon();
        let summary = s.engine.merge(&s.owner, &s.request()).unwrap();
        s.engine.undo(&s.owner, &s.org, &summary.merge_log_id).unwrap();

        let err = s.engine.undo(&s.owner, &s.org, &summary.merge_log_id).unwrap_err();
        assert_eq!(err.kind(), MergeErrorKind::Validation);
        assert_eq!(s.log_count(), 2);
    }

    #[test]
    fn undo_refuses_when_moved_credit_was_spent() {
        let s = salon();
        let summary = s.engine.merge(&s.owner, &s.request()).unwrap();
        s.store
            .write_balance(
                "client_balances",
                &BalanceRow::new(s.primary.id).with_amount("salon_credit_balance", 2),
            )
            .unwrap();

        let err = s.engine.undo(&s.owner, &s.org, &summary.merge_log_id).unwrap_err();
        assert_eq!(err.kind(), MergeErrorKind::Validation);
        assert!(s.client(&s.secondaries[0].id).is_merged());
        assert_eq!(s.client(&s.primary.id).status, ClientStatus::Active);
        assert_eq!(s.appointments_of(&s.primary.id), 4);
    }

    #[test]
    fn undo_needs_permission() {
        let s = salon();
        let summary = s.engine.merge(&s.owner, &s.request()).unwrap();
        let err = s
            .engine
            .undo(&ActorId::new(), &s.org, &summary.merge_log_id)
            .unwrap_err();
        assert_eq!(err.kind(), MergeErrorKind::Authorization);
    }

    #[test]
    fn merge_log_is_scoped_to_its_organization() {
        let s = salon();
        let summary = s.engine.merge(&s.owner, &s.request()).unwrap();
        let elsewhere = OrganizationId::new();

        let admin = ActorId::new();
        let gate = Arc::new(PermissionGate::with_default_stages(
            GateConfig::default(),
            Arc::new(InMemoryRoleDirectory::from_grants([RoleGrant::global(
                admin,
                "platform_admin",
            )])),
        ));
        let engine = MergeEngine::new(s.store.clone(), gate, s.audit.clone());

        let err = engine.merge_log(&admin, &elsewhere, &summary.merge_log_id).unwrap_err();
        assert!(matches!(err, MergeError::MergeLogNotFound(_)));
        assert!(engine.merge_log(&admin, &s.org, &summary.merge_log_id).is_ok());
    }
}
