//! Registry of dependent tables and how each one is merged.

use std::fmt;
use std::sync::Arc;

use cim_store::Datastore;
use cim_types::ClientRecord;

use crate::outcome::{SkipReason, TableOutcome};
use crate::reparent::DualColumnMerge;

/// Which client identifier a dependent table stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// The internal client id.
    ClientId,
    /// The client's id in the external point-of-sale system.
    ExternalId,
}

/// The records taking part in one merge.
#[derive(Clone, Copy, Debug)]
pub struct MergeParties<'a> {
    pub primary: &'a ClientRecord,
    pub secondaries: &'a [ClientRecord],
}

impl<'a> MergeParties<'a> {
    pub fn new(primary: &'a ClientRecord, secondaries: &'a [ClientRecord]) -> Self {
        Self {
            primary,
            secondaries,
        }
    }

    /// Secondary key values that dependent rows may still hold.
    pub fn source_keys(&self, key: KeyKind) -> Vec<String> {
        self.secondaries
            .iter()
            .filter_map(|client| key_of(client, key))
            .collect()
    }

    /// Key value rows are rewritten to.
    pub fn target_key(&self, key: KeyKind) -> Result<String, SkipReason> {
        key_of(self.primary, key).ok_or(SkipReason::PrimaryLacksExternalId)
    }
}

fn key_of(client: &ClientRecord, key: KeyKind) -> Option<String> {
    match key {
        KeyKind::ClientId => Some(client.id.to_string()),
        KeyKind::ExternalId => client.external_id.clone(),
    }
}

/// Table-specific merge logic that fits neither a plain foreign-key rewrite
/// nor additive reconciliation.
pub trait CustomMerge: Send + Sync {
    fn name(&self) -> &str;

    fn merge(
        &self,
        store: &dyn Datastore,
        table: &str,
        parties: &MergeParties<'_>,
    ) -> Result<TableOutcome, SkipReason>;
}

/// How a dependent table is merged.
#[derive(Clone)]
pub enum MergeStrategy {
    /// Rewrite `column` from secondary keys to the primary's key.
    Reparent { column: String, key: KeyKind },
    /// Sum the secondaries' `fields` into the primary and zero them.
    AdditiveReconcile { fields: Vec<String> },
    Custom(Arc<dyn CustomMerge>),
}

impl MergeStrategy {
    pub fn reparent(column: impl Into<String>, key: KeyKind) -> Self {
        Self::Reparent {
            column: column.into(),
            key,
        }
    }

    pub fn additive(fields: &[&str]) -> Self {
        Self::AdditiveReconcile {
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn is_additive(&self) -> bool {
        matches!(self, Self::AdditiveReconcile { .. })
    }
}

impl fmt::Debug for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reparent { column, key } => f
                .debug_struct("Reparent")
                .field("column", column)
                .field("key", key)
                .finish(),
            Self::AdditiveReconcile { fields } => f
                .debug_struct("AdditiveReconcile")
                .field("fields", fields)
                .finish(),
            Self::Custom(custom) => f.debug_tuple("Custom").field(&custom.name()).finish(),
        }
    }
}

/// One registered dependent table.
#[derive(Clone, Debug)]
pub struct DependentTable {
    /// Key under which the table's count is reported.
    pub label: String,
    /// Storage name of the table.
    pub table: String,
    pub strategy: MergeStrategy,
}

impl DependentTable {
    pub fn new(label: impl Into<String>, strategy: MergeStrategy) -> Self {
        let label = label.into();
        Self {
            table: label.clone(),
            label,
            strategy,
        }
    }

    pub fn stored_as(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }
}

/// Ordered list of dependent tables a merge walks.
#[derive(Clone, Debug, Default)]
pub struct TableRegistry {
    tables: Vec<DependentTable>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table, replacing any entry with the same label.
    pub fn register(&mut self, table: DependentTable) {
        self.tables.retain(|t| t.label != table.label);
        self.tables.push(table);
    }

    pub fn with(mut self, table: DependentTable) -> Self {
        self.register(table);
        self
    }

    pub fn get(&self, label: &str) -> Option<&DependentTable> {
        self.tables.iter().find(|t| t.label == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DependentTable> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Entries that rewrite references (plain and custom).
    pub fn reference_tables(&self) -> impl Iterator<Item = &DependentTable> {
        self.tables.iter().filter(|t| !t.strategy.is_additive())
    }

    /// Balance tables and the amount fields reconciled in each.
    pub fn balance_tables(&self) -> impl Iterator<Item = (&DependentTable, &[String])> {
        self.tables.iter().filter_map(|t| match &t.strategy {
            MergeStrategy::AdditiveReconcile { fields } => Some((t, fields.as_slice())),
            _ => None,
        })
    }

    /// The salon platform's dependent tables.
    pub fn salon_default() -> Self {
        let mut registry = Self::new();
        for label in [
            "appointments",
            "client_notes",
            "client_forms",
            "transactions",
            "invoices",
            "client_photos",
            "memberships",
            "waitlist_entries",
            "messages",
        ] {
            registry.register(DependentTable::new(
                label,
                MergeStrategy::reparent("client_id", KeyKind::ClientId),
            ));
        }
        registry.register(DependentTable::new(
            "pos_customers",
            MergeStrategy::reparent("external_client_id", KeyKind::ExternalId),
        ));
        registry.register(DependentTable::new(
            "vouchers",
            MergeStrategy::Custom(Arc::new(DualColumnMerge::new(
                "issued_to_client_id",
                "redeemed_by_client_id",
            ))),
        ));
        registry.register(DependentTable::new(
            "client_balances",
            MergeStrategy::additive(&["salon_credit_balance", "gift_card_balance"]),
        ));
        registry.register(DependentTable::new(
            "loyalty_points",
            MergeStrategy::additive(&["points_balance"]),
        ));
        registry
    }
}
