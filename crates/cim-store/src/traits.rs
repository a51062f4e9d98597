use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cim_types::{BalanceRow, ClientId, ClientRecord, ClientStatus, FieldResolutions, RowId, TombstoneMark};

use crate::error::StoreResult;

/// A dependent row whose foreign key matched a selection, with the value the
/// key held at selection time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowReference {
    pub row_id: RowId,
    pub value: String,
}

/// Client rows.
pub trait ClientStore: Send + Sync {
    /// Read one client row. Returns `Ok(None)` if it does not exist.
    fn get_client(&self, id: &ClientId) -> StoreResult<Option<ClientRecord>>;

    /// Insert or fully replace a client row.
    ///
    /// Used by intake and by merge reversal; the merge path itself never
    /// writes whole rows.
    fn put_client(&self, record: &ClientRecord) -> StoreResult<()>;

    /// Write the supplied resolution values onto one row as a single update,
    /// stamping `updated_at` with `at`.
    ///
    /// Either every supplied field is written or, on error, none is. A row
    /// that already holds every supplied value is left untouched.
    fn update_resolvable_fields(
        &self,
        id: &ClientId,
        resolutions: &FieldResolutions,
        at: DateTime<Utc>,
    ) -> StoreResult<ClientRecord>;

    /// Move a row from `expected` to `next` status atomically.
    ///
    /// Returns `Ok(false)` without writing if the row is not currently in
    /// `expected`. Returns `Err(ClientNotFound)` if the row does not exist.
    fn compare_and_set_status(
        &self,
        id: &ClientId,
        expected: ClientStatus,
        next: ClientStatus,
    ) -> StoreResult<bool>;

    /// Mark a `merging` row as merged into its canonical record.
    fn tombstone(&self, id: &ClientId, mark: &TombstoneMark) -> StoreResult<()>;

    /// Ids of every `merged` row whose `merged_into_client_id` is `target`.
    fn merged_into(&self, target: &ClientId) -> StoreResult<Vec<ClientId>>;

    /// Re-point a `merged` row from `from` to `to`.
    ///
    /// Returns `Ok(false)` without writing if the row is not merged into
    /// `from`.
    fn relink(&self, id: &ClientId, from: &ClientId, to: &ClientId) -> StoreResult<bool>;

    /// Read several client rows. Default implementation calls `get_client()`
    /// for each ID.
    fn get_clients(&self, ids: &[ClientId]) -> StoreResult<Vec<Option<ClientRecord>>> {
        ids.iter().map(|id| self.get_client(id)).collect()
    }
}

/// Dependent tables that reference a client through a foreign-key column.
pub trait ReferenceStore: Send + Sync {
    /// Select every row of `table` whose `column` holds one of `values`.
    fn select_references(
        &self,
        table: &str,
        column: &str,
        values: &[String],
    ) -> StoreResult<Vec<RowReference>>;

    /// Set `column` to `value` on each listed row. Returns the number of rows
    /// whose value actually changed.
    fn rewrite_references(
        &self,
        table: &str,
        column: &str,
        rows: &[RowId],
        value: &str,
    ) -> StoreResult<u64>;

    /// Set `column` to `value` on one row only if it currently holds
    /// `expected`. Returns whether the row was written.
    fn rewrite_reference_if(
        &self,
        table: &str,
        column: &str,
        row: RowId,
        expected: &str,
        value: &str,
    ) -> StoreResult<bool>;
}

/// Per-client numeric balance tables.
pub trait BalanceStore: Send + Sync {
    /// Read the balance row `client` holds in `table`, if any.
    fn read_balance(&self, table: &str, client: &ClientId) -> StoreResult<Option<BalanceRow>>;

    /// Insert or replace a balance row.
    fn write_balance(&self, table: &str, row: &BalanceRow) -> StoreResult<()>;
}

/// Everything the merge engine needs from a backend.
pub trait Datastore: ClientStore + ReferenceStore + BalanceStore {}

impl<T: ClientStore + ReferenceStore + BalanceStore> Datastore for T {}
