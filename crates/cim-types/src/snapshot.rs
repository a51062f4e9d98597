use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::client::ClientRecord;
use crate::identity::ClientId;

/// Named integer amounts (minor currency units or points) held by one client
/// in one balance table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRow {
    pub client_id: ClientId,
    pub amounts: BTreeMap<String, i64>,
}

impl BalanceRow {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            amounts: BTreeMap::new(),
        }
    }

    pub fn with_amount(mut self, field: impl Into<String>, amount: i64) -> Self {
        self.amounts.insert(field.into(), amount);
        self
    }

    /// Amount of `field`, treating a missing column as zero.
    pub fn amount(&self, field: &str) -> i64 {
        self.amounts.get(field).copied().unwrap_or(0)
    }

    pub fn is_zero(&self) -> bool {
        self.amounts.values().all(|v| *v == 0)
    }
}

/// Full pre-merge state of one client: its record plus every balance row it
/// holds, keyed by balance table name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSnapshot {
    pub client: ClientRecord,
    #[serde(default)]
    pub balances: BTreeMap<String, BalanceRow>,
}

impl ClientSnapshot {
    pub fn new(client: ClientRecord) -> Self {
        Self {
            client,
            balances: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> ClientId {
        self.client.id
    }

    /// Snapshotted amount of `field` in `table`; zero if the client had no row.
    pub fn balance(&self, table: &str, field: &str) -> i64 {
        self.balances
            .get(table)
            .map(|row| row.amount(field))
            .unwrap_or(0)
    }
}
