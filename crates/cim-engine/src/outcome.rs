use std::collections::BTreeMap;
use std::fmt;

use cim_audit::ReparentedRow;
use cim_store::StoreError;

/// What one registry entry did during a merge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableOutcome {
    /// Rows (or balance rows) changed.
    pub count: u64,
    /// Foreign keys rewritten, for undo. Empty for balance tables.
    pub rows: Vec<ReparentedRow>,
}

impl TableOutcome {
    pub fn counted(count: u64) -> Self {
        Self {
            count,
            rows: Vec::new(),
        }
    }

    pub fn absorb(&mut self, other: TableOutcome) {
        self.count += other.count;
        self.rows.extend(other.rows);
    }
}

/// Why a registry entry contributed no count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    TableMissing(String),
    ColumnMissing { table: String, column: String },
    /// An external-id table was registered but the primary has no external
    /// id to point rows at.
    PrimaryLacksExternalId,
    Backend(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TableMissing(table) => write!(f, "table '{table}' does not exist"),
            Self::ColumnMissing { table, column } => {
                write!(f, "table '{table}' has no column '{column}'")
            }
            Self::PrimaryLacksExternalId => write!(f, "primary has no external id"),
            Self::Backend(message) => write!(f, "backend error: {message}"),
        }
    }
}

impl From<StoreError> for SkipReason {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TableNotFound(table) => Self::TableMissing(table),
            StoreError::ColumnNotFound { table, column } => Self::ColumnMissing { table, column },
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Per-table results of a merge, keyed by registry label.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableReport {
    pub counts: BTreeMap<String, u64>,
    pub rows: BTreeMap<String, Vec<ReparentedRow>>,
    pub skipped: BTreeMap<String, SkipReason>,
}

impl TableReport {
    pub fn record(&mut self, label: &str, result: Result<TableOutcome, SkipReason>) {
        match result {
            Ok(outcome) => {
                tracing::debug!(table = label, count = outcome.count, "table merged");
                self.counts.insert(label.to_string(), outcome.count);
                if !outcome.rows.is_empty() {
                    self.rows.insert(label.to_string(), outcome.rows);
                }
            }
            Err(reason) => {
                tracing::warn!(table = label, %reason, "table skipped");
                self.skipped.insert(label.to_string(), reason);
            }
        }
    }

    pub fn extend(&mut self, other: TableReport) {
        self.counts.extend(other.counts);
        self.rows.extend(other.rows);
        self.skipped.extend(other.skipped);
    }

    /// Skip reasons rendered for the audit log.
    pub fn skipped_descriptions(&self) -> BTreeMap<String, String> {
        self.skipped
            .iter()
            .map(|(label, reason)| (label.clone(), reason.to_string()))
            .collect()
    }
}
