//! Reference reparenting: rewrite dependent rows from secondary keys to the
//! primary's key, one registry entry at a time.

use cim_audit::ReparentedRow;
use cim_store::{Datastore, ReferenceStore};

use crate::outcome::{SkipReason, TableOutcome, TableReport};
use crate::registry::{CustomMerge, DependentTable, KeyKind, MergeParties, MergeStrategy, TableRegistry};

/// Rewrite every row of `table` whose `column` holds one of `sources` so it
/// holds `target`.
pub fn reparent_column<S: ReferenceStore + ?Sized>(
    store: &S,
    table: &str,
    column: &str,
    sources: &[String],
    target: &str,
) -> Result<TableOutcome, SkipReason> {
    let matches = store.select_references(table, column, sources)?;
    let pending: Vec<_> = matches.into_iter().filter(|r| r.value != target).collect();
    if pending.is_empty() {
        return Ok(TableOutcome::default());
    }

    let ids: Vec<_> = pending.iter().map(|r| r.row_id).collect();
    let count = store.rewrite_references(table, column, &ids, target)?;
    let rows = pending
        .into_iter()
        .map(|r| ReparentedRow {
            table: table.to_string(),
            column: column.to_string(),
            row_id: r.row_id,
            previous_value: r.value,
            written_value: target.to_string(),
        })
        .collect();
    Ok(TableOutcome { count, rows })
}

/// A table that references clients from two columns, each rewritten on its
/// own. A voucher issued to one client and redeemed by another is the case
/// this exists for.
#[derive(Clone, Debug)]
pub struct DualColumnMerge {
    name: String,
    columns: [String; 2],
}

impl DualColumnMerge {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        let columns = [first.into(), second.into()];
        Self {
            name: format!("dual_column({}, {})", columns[0], columns[1]),
            columns,
        }
    }
}

impl CustomMerge for DualColumnMerge {
    fn name(&self) -> &str {
        &self.name
    }

    fn merge(
        &self,
        store: &dyn Datastore,
        table: &str,
        parties: &MergeParties<'_>,
    ) -> Result<TableOutcome, SkipReason> {
        let sources = parties.source_keys(KeyKind::ClientId);
        let target = parties.target_key(KeyKind::ClientId)?;

        let mut total = TableOutcome::default();
        let mut first_error = None;
        let mut any_ok = false;
        for column in &self.columns {
            match reparent_column(store, table, column, &sources, &target) {
                Ok(outcome) => {
                    any_ok = true;
                    total.absorb(outcome);
                }
                Err(reason) => {
                    tracing::warn!(table, column = column.as_str(), %reason, "column skipped");
                    first_error.get_or_insert(reason);
                }
            }
        }

        match first_error {
            Some(reason) if !any_ok => Err(reason),
            _ => Ok(total),
        }
    }
}

/// Walks the reference-rewriting entries of a registry.
pub struct ReparentingEngine<'a> {
    store: &'a dyn Datastore,
}

impl<'a> ReparentingEngine<'a> {
    pub fn new(store: &'a dyn Datastore) -> Self {
        Self { store }
    }

    /// Reparent every plain and custom entry. A failing entry is skipped and
    /// never stops the walk.
    pub fn run(&self, registry: &TableRegistry, parties: &MergeParties<'_>) -> TableReport {
        let mut report = TableReport::default();
        for entry in registry.reference_tables() {
            report.record(&entry.label, self.apply(entry, parties));
        }
        report
    }

    fn apply(
        &self,
        entry: &DependentTable,
        parties: &MergeParties<'_>,
    ) -> Result<TableOutcome, SkipReason> {
        match &entry.strategy {
            MergeStrategy::Reparent { column, key } => {
                let sources = parties.source_keys(*key);
                if sources.is_empty() {
                    return Ok(TableOutcome::default());
                }
                let target = parties.target_key(*key)?;
                reparent_column(self.store, &entry.table, column, &sources, &target)
            }
            MergeStrategy::Custom(custom) => custom.merge(self.store, &entry.table, parties),
            MergeStrategy::AdditiveReconcile { .. } => Ok(TableOutcome::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cim_store::{Fault, InMemoryDatastore};
    use cim_types::{ClientRecord, OrganizationId};

    struct World {
        store: InMemoryDatastore,
        primary: ClientRecord,
        secondaries: Vec<ClientRecord>,
    }

    fn world() -> World {
        let org = OrganizationId::new();
        let store = InMemoryDatastore::new();
        store.create_table("appointments", ["client_id", "service"]).unwrap();
        store
            .create_table("vouchers", ["issued_to_client_id", "redeemed_by_client_id"])
            .unwrap();
        store.create_table("pos_customers", ["external_client_id"]).unwrap();
        World {
            store,
            primary: ClientRecord::new(org, "Ada", "Lovelace").with_external_id("pos-100"),
            secondaries: vec![
                ClientRecord::new(org, "Ada", "L").with_external_id("pos-200"),
                ClientRecord::new(org, "A.", "Lovelace"),
            ],
        }
    }

    fn id(client: &ClientRecord) -> Option<String> {
        Some(client.id.to_string())
    }

    #[test]
    fn rewrites_rows_of_every_secondary() {
        let w = world();
        for client in &w.secondaries {
            w.store
                .insert_row("appointments", [("client_id", id(client)), ("service", None)])
                .unwrap();
        }
        let untouched = w
            .store
            .insert_row("appointments", [("client_id", Some("someone-else".into()))])
            .unwrap();

        let registry = TableRegistry::salon_default();
        let parties = MergeParties::new(&w.primary, &w.secondaries);
        let report = ReparentingEngine::new(&w.store).run(&registry, &parties);

        assert_eq!(report.counts.get("appointments"), Some(&2));
        assert_eq!(report.rows["appointments"].len(), 2);
        assert_eq!(
            w.store
                .count_references("appointments", "client_id", &w.primary.id.to_string())
                .unwrap(),
            2
        );
        assert_eq!(
            w.store.row_value("appointments", untouched, "client_id").unwrap().as_deref(),
            Some("someone-else")
        );
    }

    #[test]
    fn missing_tables_are_skipped_not_fatal() {
        let w = world();
        w.store
            .insert_row("appointments", [("client_id", id(&w.secondaries[0]))])
            .unwrap();

        let registry = TableRegistry::salon_default();
        let parties = MergeParties::new(&w.primary, &w.secondaries);
        let report = ReparentingEngine::new(&w.store).run(&registry, &parties);

        assert_eq!(report.counts.get("appointments"), Some(&1));
        assert_eq!(
            report.skipped.get("client_notes"),
            Some(&SkipReason::TableMissing("client_notes".into()))
        );
        assert!(!report.counts.contains_key("client_notes"));
    }

    #[test]
    fn backend_failure_on_one_table_skips_only_that_table() {
        let w = world();
        w.store
            .insert_row("appointments", [("client_id", id(&w.secondaries[0]))])
            .unwrap();
        w.store.inject(Fault::Table("vouchers".into()));

        let registry = TableRegistry::salon_default();
        let parties = MergeParties::new(&w.primary, &w.secondaries);
        let report = ReparentingEngine::new(&w.store).run(&registry, &parties);

        assert!(matches!(report.skipped.get("vouchers"), Some(SkipReason::Backend(_))));
        assert_eq!(report.counts.get("appointments"), Some(&1));
    }

    #[test]
    fn external_id_table_uses_external_ids() {
        let w = world();
        w.store
            .insert_row("pos_customers", [("external_client_id", Some("pos-200".into()))])
            .unwrap();

        let registry = TableRegistry::salon_default();
        let parties = MergeParties::new(&w.primary, &w.secondaries);
        let report = ReparentingEngine::new(&w.store).run(&registry, &parties);

        assert_eq!(report.counts.get("pos_customers"), Some(&1));
        assert_eq!(
            w.store
                .count_references("pos_customers", "external_client_id", "pos-100")
                .unwrap(),
            1
        );
    }

    #[test]
    fn external_id_table_skipped_when_primary_has_none() {
        let mut w = world();
        w.primary.external_id = None;

        let registry = TableRegistry::salon_default();
        let parties = MergeParties::new(&w.primary, &w.secondaries);
        let report = ReparentingEngine::new(&w.store).run(&registry, &parties);

        assert_eq!(
            report.skipped.get("pos_customers"),
            Some(&SkipReason::PrimaryLacksExternalId)
        );
    }

    #[test]
    fn voucher_columns_rewritten_independently() {
        let w = world();
        let s = &w.secondaries[0];
        w.store
            .insert_row(
                "vouchers",
                [
                    ("issued_to_client_id", id(s)),
                    ("redeemed_by_client_id", id(s)),
                ],
            )
            .unwrap();
        w.store
            .insert_row(
                "vouchers",
                [
                    ("issued_to_client_id", Some("gift-giver".into())),
                    ("redeemed_by_client_id", id(&w.secondaries[1])),
                ],
            )
            .unwrap();

        let parties = MergeParties::new(&w.primary, &w.secondaries);
        let outcome = DualColumnMerge::new("issued_to_client_id", "redeemed_by_client_id")
            .merge(&w.store, "vouchers", &parties)
            .unwrap();

        assert_eq!(outcome.count, 3);
        let primary = w.primary.id.to_string();
        assert_eq!(
            w.store.count_references("vouchers", "issued_to_client_id", &primary).unwrap(),
            1
        );
        assert_eq!(
            w.store.count_references("vouchers", "redeemed_by_client_id", &primary).unwrap(),
            2
        );
    }

    #[test]
    fn voucher_with_one_missing_column_still_rewrites_the_other() {
        let w = world();
        w.store.create_table("legacy_vouchers", ["issued_to_client_id"]).unwrap();
        w.store
            .insert_row("legacy_vouchers", [("issued_to_client_id", id(&w.secondaries[0]))])
            .unwrap();

        let parties = MergeParties::new(&w.primary, &w.secondaries);
        let outcome = DualColumnMerge::new("issued_to_client_id", "redeemed_by_client_id")
            .merge(&w.store, "legacy_vouchers", &parties)
            .unwrap();
        assert_eq!(outcome.count, 1);
    }

    #[test]
    fn second_run_changes_nothing() {
        let w = world();
        w.store
            .insert_row("appointments", [("client_id", id(&w.secondaries[0]))])
            .unwrap();

        let registry = TableRegistry::salon_default();
        let parties = MergeParties::new(&w.primary, &w.secondaries);
        let engine = ReparentingEngine::new(&w.store);
        engine.run(&registry, &parties);
        let again = engine.run(&registry, &parties);

        assert!(again.counts.values().all(|c| *c == 0));
        assert!(again.rows.is_empty());
    }
}
