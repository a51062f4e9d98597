use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cim_types::{BalanceRow, ClientRecord, RowId};

/// One row of a dependent table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureRow {
    pub id: RowId,
    pub values: BTreeMap<String, Option<String>>,
}

/// A dependent table: its columns and rows.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFixture {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<FixtureRow>,
}

/// A balance table: its amount fields and per-client rows.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceTableFixture {
    pub fields: Vec<String>,
    #[serde(default)]
    pub rows: Vec<BalanceRow>,
}

/// Serializable image of a whole datastore.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatastoreFixture {
    #[serde(default)]
    pub clients: Vec<ClientRecord>,
    #[serde(default)]
    pub tables: BTreeMap<String, TableFixture>,
    #[serde(default)]
    pub balance_tables: BTreeMap<String, BalanceTableFixture>,
}

impl DatastoreFixture {
    pub fn from_json(data: &str) -> Result<Self, crate::StoreError> {
        serde_json::from_str(data).map_err(|e| crate::StoreError::Serialization(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String, crate::StoreError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| crate::StoreError::Serialization(e.to_string()))
    }
}
