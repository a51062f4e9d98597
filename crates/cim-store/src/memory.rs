//! In-memory datastore for tests, the CLI, and embedding.
//!
//! [`InMemoryDatastore`] keeps client rows, dependent tables, and balance
//! tables in maps behind a single `RwLock`. Each trait call takes the lock
//! once, so every call is atomic on its own and nothing spans calls -- the
//! same guarantee a remote row store gives the merge engine.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use cim_types::{
    BalanceRow, ClientId, ClientRecord, ClientStatus, FieldResolutions, RowId, TombstoneMark,
};

use crate::error::{StoreError, StoreResult};
use crate::fixture::{BalanceTableFixture, DatastoreFixture, FixtureRow, TableFixture};
use crate::traits::{BalanceStore, ClientStore, ReferenceStore, RowReference};

/// A failure the in-memory backend can be told to produce.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Every operation on this dependent or balance table fails.
    Table(String),
    /// `update_resolvable_fields` fails.
    FieldUpdate,
    /// `tombstone` fails.
    Tombstone,
}

#[derive(Clone, Debug, Default)]
struct DependentTable {
    columns: BTreeSet<String>,
    rows: BTreeMap<RowId, BTreeMap<String, Option<String>>>,
    next_row: u64,
}

impl DependentTable {
    fn require_column(&self, table: &str, column: &str) -> StoreResult<()> {
        if self.columns.contains(column) {
            Ok(())
        } else {
            Err(StoreError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            })
        }
    }
}

#[derive(Clone, Debug, Default)]
struct BalanceTable {
    fields: BTreeSet<String>,
    rows: BTreeMap<ClientId, BalanceRow>,
}

#[derive(Default)]
struct DatastoreState {
    clients: HashMap<ClientId, ClientRecord>,
    tables: HashMap<String, DependentTable>,
    balances: HashMap<String, BalanceTable>,
}

/// An in-memory implementation of every datastore trait.
#[derive(Default)]
pub struct InMemoryDatastore {
    inner: RwLock<DatastoreState>,
    faults: RwLock<BTreeSet<String>>,
}

impl InMemoryDatastore {
    /// Create an empty datastore with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a datastore from a serialized fixture.
    pub fn from_fixture(fixture: &DatastoreFixture) -> StoreResult<Self> {
        let store = Self::new();
        for client in &fixture.clients {
            store.put_client(client)?;
        }
        for (name, table) in &fixture.tables {
            store.create_table(name, table.columns.iter().map(String::as_str))?;
            let mut state = store.write_state()?;
            let target = state
                .tables
                .get_mut(name)
                .ok_or_else(|| StoreError::TableNotFound(name.clone()))?;
            for row in &table.rows {
                for column in row.values.keys() {
                    target.require_column(name, column)?;
                }
                target.rows.insert(row.id, row.values.clone());
                target.next_row = target.next_row.max(row.id.0);
            }
        }
        for (name, table) in &fixture.balance_tables {
            store.create_balance_table(name, table.fields.iter().map(String::as_str))?;
            for row in &table.rows {
                store.write_balance(name, row)?;
            }
        }
        Ok(store)
    }

    /// Export the full contents as a fixture.
    pub fn to_fixture(&self) -> StoreResult<DatastoreFixture> {
        let state = self.read_state()?;
        let mut clients: Vec<ClientRecord> = state.clients.values().cloned().collect();
        clients.sort_by_key(|c| c.id);

        let tables = state
            .tables
            .iter()
            .map(|(name, table)| {
                let rows = table
                    .rows
                    .iter()
                    .map(|(id, values)| FixtureRow {
                        id: *id,
                        values: values.clone(),
                    })
                    .collect();
                (
                    name.clone(),
                    TableFixture {
                        columns: table.columns.iter().cloned().collect(),
                        rows,
                    },
                )
            })
            .collect();

        let balance_tables = state
            .balances
            .iter()
            .map(|(name, table)| {
                (
                    name.clone(),
                    BalanceTableFixture {
                        fields: table.fields.iter().cloned().collect(),
                        rows: table.rows.values().cloned().collect(),
                    },
                )
            })
            .collect();

        Ok(DatastoreFixture {
            clients,
            tables,
            balance_tables,
        })
    }

    /// Create a dependent table. A no-op if it already exists with the same
    /// columns; new columns are added to an existing table.
    pub fn create_table<'a>(
        &self,
        name: &str,
        columns: impl IntoIterator<Item = &'a str>,
    ) -> StoreResult<()> {
        let mut state = self.write_state()?;
        let table = state.tables.entry(name.to_string()).or_default();
        table.columns.extend(columns.into_iter().map(str::to_string));
        Ok(())
    }

    /// Drop a dependent table and all of its rows.
    pub fn drop_table(&self, name: &str) -> StoreResult<bool> {
        Ok(self.write_state()?.tables.remove(name).is_some())
    }

    /// Insert a row into a dependent table and return its generated ID.
    pub fn insert_row<'a>(
        &self,
        table: &str,
        values: impl IntoIterator<Item = (&'a str, Option<String>)>,
    ) -> StoreResult<RowId> {
        let mut state = self.write_state()?;
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        let mut row = BTreeMap::new();
        for (column, value) in values {
            target.require_column(table, column)?;
            row.insert(column.to_string(), value);
        }
        target.next_row += 1;
        let id = RowId(target.next_row);
        target.rows.insert(id, row);
        Ok(id)
    }

    /// Read one column of one dependent row.
    pub fn row_value(&self, table: &str, row: RowId, column: &str) -> StoreResult<Option<String>> {
        let state = self.read_state()?;
        let target = state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        target.require_column(table, column)?;
        Ok(target
            .rows
            .get(&row)
            .and_then(|values| values.get(column).cloned().flatten()))
    }

    /// Number of rows in `table` whose `column` equals `value`.
    pub fn count_references(&self, table: &str, column: &str, value: &str) -> StoreResult<usize> {
        let state = self.read_state()?;
        let target = state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        target.require_column(table, column)?;
        Ok(target
            .rows
            .values()
            .filter(|values| values.get(column).and_then(|v| v.as_deref()) == Some(value))
            .count())
    }

    /// Create a balance table holding the named amount fields.
    pub fn create_balance_table<'a>(
        &self,
        name: &str,
        fields: impl IntoIterator<Item = &'a str>,
    ) -> StoreResult<()> {
        let mut state = self.write_state()?;
        let table = state.balances.entry(name.to_string()).or_default();
        table.fields.extend(fields.into_iter().map(str::to_string));
        Ok(())
    }

    /// Make subsequent operations matching `fault` fail.
    pub fn inject(&self, fault: Fault) {
        if let Ok(mut faults) = self.faults.write() {
            faults.insert(fault_key(&fault));
        }
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.write() {
            faults.clear();
        }
    }

    fn check_fault(&self, fault: &Fault) -> StoreResult<()> {
        let faults = self
            .faults
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))?;
        if faults.contains(&fault_key(fault)) {
            return Err(StoreError::Unavailable(format!("injected fault: {fault:?}")));
        }
        Ok(())
    }

    fn read_state(&self) -> StoreResult<RwLockReadGuard<'_, DatastoreState>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn write_state(&self) -> StoreResult<RwLockWriteGuard<'_, DatastoreState>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }
}

fn fault_key(fault: &Fault) -> String {
    match fault {
        Fault::Table(name) => format!("table:{name}"),
        Fault::FieldUpdate => "client:fields".into(),
        Fault::Tombstone => "client:tombstone".into(),
    }
}

impl std::fmt::Debug for InMemoryDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("InMemoryDatastore");
        if let Ok(state) = self.inner.read() {
            s.field("clients", &state.clients.len())
                .field("tables", &state.tables.len())
                .field("balance_tables", &state.balances.len());
        }
        s.finish()
    }
}

impl ClientStore for InMemoryDatastore {
    fn get_client(&self, id: &ClientId) -> StoreResult<Option<ClientRecord>> {
        Ok(self.read_state()?.clients.get(id).cloned())
    }

    fn put_client(&self, record: &ClientRecord) -> StoreResult<()> {
        self.write_state()?.clients.insert(record.id, record.clone());
        Ok(())
    }

    fn update_resolvable_fields(
        &self,
        id: &ClientId,
        resolutions: &FieldResolutions,
        at: DateTime<Utc>,
    ) -> StoreResult<ClientRecord> {
        self.check_fault(&Fault::FieldUpdate)?;
        let mut state = self.write_state()?;
        let record = state
            .clients
            .get_mut(id)
            .ok_or(StoreError::ClientNotFound(*id))?;
        let mut updated = record.clone();
        resolutions.apply_to(&mut updated);
        if updated != *record {
            updated.updated_at = at;
            *record = updated;
        }
        Ok(record.clone())
    }

    fn compare_and_set_status(
        &self,
        id: &ClientId,
        expected: ClientStatus,
        next: ClientStatus,
    ) -> StoreResult<bool> {
        let mut state = self.write_state()?;
        let record = state
            .clients
            .get_mut(id)
            .ok_or(StoreError::ClientNotFound(*id))?;
        if record.status != expected {
            return Ok(false);
        }
        record.status = next;
        Ok(true)
    }

    fn tombstone(&self, id: &ClientId, mark: &TombstoneMark) -> StoreResult<()> {
        self.check_fault(&Fault::Tombstone)?;
        let mut state = self.write_state()?;
        let record = state
            .clients
            .get_mut(id)
            .ok_or(StoreError::ClientNotFound(*id))?;
        if record.status != ClientStatus::Merging {
            return Err(StoreError::StatusMismatch {
                id: *id,
                expected: ClientStatus::Merging,
                actual: record.status,
            });
        }
        record.apply_tombstone(mark);
        Ok(())
    }

    fn merged_into(&self, target: &ClientId) -> StoreResult<Vec<ClientId>> {
        let state = self.read_state()?;
        let mut ids: Vec<ClientId> = state
            .clients
            .values()
            .filter(|c| c.is_merged_into(target))
            .map(|c| c.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn relink(&self, id: &ClientId, from: &ClientId, to: &ClientId) -> StoreResult<bool> {
        let mut state = self.write_state()?;
        let record = state
            .clients
            .get_mut(id)
            .ok_or(StoreError::ClientNotFound(*id))?;
        if !record.is_merged_into(from) {
            return Ok(false);
        }
        record.merged_into_client_id = Some(*to);
        Ok(true)
    }
}

impl ReferenceStore for InMemoryDatastore {
    fn select_references(
        &self,
        table: &str,
        column: &str,
        values: &[String],
    ) -> StoreResult<Vec<RowReference>> {
        self.check_fault(&Fault::Table(table.to_string()))?;
        let state = self.read_state()?;
        let target = state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        target.require_column(table, column)?;

        Ok(target
            .rows
            .iter()
            .filter_map(|(id, row)| {
                let value = row.get(column)?.as_ref()?;
                values.contains(value).then(|| RowReference {
                    row_id: *id,
                    value: value.clone(),
                })
            })
            .collect())
    }

    fn rewrite_references(
        &self,
        table: &str,
        column: &str,
        rows: &[RowId],
        value: &str,
    ) -> StoreResult<u64> {
        self.check_fault(&Fault::Table(table.to_string()))?;
        let mut state = self.write_state()?;
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        target.require_column(table, column)?;

        let mut changed = 0;
        for id in rows {
            if let Some(row) = target.rows.get_mut(id) {
                let slot = row.entry(column.to_string()).or_default();
                if slot.as_deref() != Some(value) {
                    *slot = Some(value.to_string());
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    fn rewrite_reference_if(
        &self,
        table: &str,
        column: &str,
        row: RowId,
        expected: &str,
        value: &str,
    ) -> StoreResult<bool> {
        self.check_fault(&Fault::Table(table.to_string()))?;
        let mut state = self.write_state()?;
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        target.require_column(table, column)?;

        match target.rows.get_mut(&row).and_then(|r| r.get_mut(column)) {
            Some(slot) if slot.as_deref() == Some(expected) => {
                *slot = Some(value.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl BalanceStore for InMemoryDatastore {
    fn read_balance(&self, table: &str, client: &ClientId) -> StoreResult<Option<BalanceRow>> {
        self.check_fault(&Fault::Table(table.to_string()))?;
        let state = self.read_state()?;
        let target = state
            .balances
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        Ok(target.rows.get(client).cloned())
    }

    fn write_balance(&self, table: &str, row: &BalanceRow) -> StoreResult<()> {
        self.check_fault(&Fault::Table(table.to_string()))?;
        let mut state = self.write_state()?;
        let target = state
            .balances
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        if let Some(field) = row.amounts.keys().find(|f| !target.fields.contains(*f)) {
            return Err(StoreError::ColumnNotFound {
                table: table.to_string(),
                column: field.clone(),
            });
        }
        target.rows.insert(row.client_id, row.clone());
        Ok(())
    }
}
