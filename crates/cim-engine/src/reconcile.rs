//! Additive reconciliation of per-client balances.

use std::collections::BTreeMap;

use cim_store::Datastore;
use cim_types::BalanceRow;

use crate::outcome::{SkipReason, TableOutcome, TableReport};
use crate::registry::{MergeParties, TableRegistry};

/// Moves secondary balances onto the primary: sum, credit, then zero.
pub struct BalanceReconciler<'a> {
    store: &'a dyn Datastore,
}

impl<'a> BalanceReconciler<'a> {
    pub fn new(store: &'a dyn Datastore) -> Self {
        Self { store }
    }

    /// Reconcile every additive entry of the registry.
    pub fn run(&self, registry: &TableRegistry, parties: &MergeParties<'_>) -> TableReport {
        let mut report = TableReport::default();
        for (entry, fields) in registry.balance_tables() {
            report.record(&entry.label, self.reconcile(&entry.table, fields, parties));
        }
        report
    }

    /// Reconcile one balance table. The count is the number of secondary rows
    /// that held a non-zero amount and were zeroed.
    ///
    /// The primary is credited before any secondary is zeroed. If zeroing
    /// fails part way, the credit for the rows still holding their amounts is
    /// taken back off the primary before the table is reported as skipped.
    pub fn reconcile(
        &self,
        table: &str,
        fields: &[String],
        parties: &MergeParties<'_>,
    ) -> Result<TableOutcome, SkipReason> {
        let primary_before = self.store.read_balance(table, &parties.primary.id)?;

        let mut moving = Vec::new();
        for secondary in parties.secondaries {
            if let Some(row) = self.store.read_balance(table, &secondary.id)? {
                if fields.iter().any(|f| row.amount(f) != 0) {
                    moving.push(row);
                }
            }
        }
        if moving.is_empty() {
            return Ok(TableOutcome::default());
        }

        let sums = sum_fields(fields, &moving)?;
        let base = primary_before.unwrap_or_else(|| BalanceRow::new(parties.primary.id));
        let credited = add_amounts(&base, &sums, 1)?;
        self.store.write_balance(table, &credited)?;

        let mut zeroed = 0;
        for (index, row) in moving.iter().enumerate() {
            let mut cleared = row.clone();
            for field in fields {
                cleared.amounts.insert(field.clone(), 0);
            }
            if let Err(err) = self.store.write_balance(table, &cleared) {
                let reason = SkipReason::from(err);
                self.take_back(table, fields, &credited, &moving[index..]);
                return Err(reason);
            }
            zeroed += 1;
        }

        Ok(TableOutcome::counted(zeroed))
    }

    fn take_back(&self, table: &str, fields: &[String], credited: &BalanceRow, unmoved: &[BalanceRow]) {
        let compensated = sum_fields(fields, unmoved)
            .and_then(|sums| add_amounts(credited, &sums, -1))
            .and_then(|row| self.store.write_balance(table, &row).map_err(SkipReason::from));
        if let Err(reason) = compensated {
            tracing::error!(
                table,
                client = %credited.client_id,
                %reason,
                "could not take back primary credit after partial reconciliation"
            );
        }
    }
}

fn sum_fields(fields: &[String], rows: &[BalanceRow]) -> Result<BTreeMap<String, i64>, SkipReason> {
    let mut sums = BTreeMap::new();
    for field in fields {
        let mut total: i64 = 0;
        for row in rows {
            total = total
                .checked_add(row.amount(field))
                .ok_or_else(|| overflow(field))?;
        }
        sums.insert(field.clone(), total);
    }
    Ok(sums)
}

/// `base + sign * delta` for every field in `delta`.
pub(crate) fn add_amounts(
    base: &BalanceRow,
    delta: &BTreeMap<String, i64>,
    sign: i64,
) -> Result<BalanceRow, SkipReason> {
    let mut row = base.clone();
    for (field, amount) in delta {
        let change = amount.checked_mul(sign).ok_or_else(|| overflow(field))?;
        let value = row
            .amount(field)
            .checked_add(change)
            .ok_or_else(|| overflow(field))?;
        row.amounts.insert(field.clone(), value);
    }
    Ok(row)
}

fn overflow(field: &str) -> SkipReason {
    SkipReason::Backend(format!("amount overflow in '{field}'"))
}
