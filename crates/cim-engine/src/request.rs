use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cim_types::{ClientId, FieldResolutions, MergeLogId, OrganizationId};

/// A request to fold `secondary_client_ids` into `primary_client_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub primary_client_id: ClientId,
    pub secondary_client_ids: Vec<ClientId>,
    #[serde(default)]
    pub field_resolutions: FieldResolutions,
    pub organization_id: OrganizationId,
}

impl MergeRequest {
    pub fn new(
        organization_id: OrganizationId,
        primary_client_id: ClientId,
        secondary_client_ids: Vec<ClientId>,
    ) -> Self {
        Self {
            primary_client_id,
            secondary_client_ids,
            field_resolutions: FieldResolutions::default(),
            organization_id,
        }
    }

    pub fn with_resolutions(mut self, resolutions: FieldResolutions) -> Self {
        self.field_resolutions = resolutions;
        self
    }
}

/// Orchestrator states, in the order a successful merge passes through them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeState {
    Start,
    Authorized,
    Snapshotted,
    FieldsResolved,
    Reparented,
    Reconciled,
    Tombstoned,
    Logged,
    Aborted,
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Authorized => "authorized",
            Self::Snapshotted => "snapshotted",
            Self::FieldsResolved => "fields_resolved",
            Self::Reparented => "reparented",
            Self::Reconciled => "reconciled",
            Self::Tombstoned => "tombstoned",
            Self::Logged => "logged",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Result of a completed merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeSummary {
    pub merge_log_id: MergeLogId,
    /// Table label -> rows changed. Skipped tables are absent.
    pub reparenting_counts: BTreeMap<String, u64>,
    /// Table label -> skip reason. Kept server-side.
    pub skipped_tables: BTreeMap<String, String>,
    /// Secondaries that were already merged into the primary before this run.
    pub already_merged: Vec<ClientId>,
    /// States visited, starting at `Start`.
    pub states: Vec<MergeState>,
}

impl MergeSummary {
    pub fn total_reparented(&self) -> u64 {
        self.reparenting_counts.values().sum()
    }
}

/// Result of a reversed merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UndoSummary {
    pub merge_log_id: MergeLogId,
    pub undone_at: DateTime<Utc>,
    /// Table label -> rows pointed back at their original client.
    pub restored_counts: BTreeMap<String, u64>,
}
