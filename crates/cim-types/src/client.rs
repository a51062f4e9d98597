use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{ActorId, ClientId, OrganizationId};

/// Lifecycle status of a client record.
///
/// `Merging` is a transient lock state: a record enters it through a
/// compare-and-set from `Active` when a merge starts, and leaves it when the
/// merge tombstones the record (`Merged`) or releases it (`Active`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Active,
    Merging,
    Merged,
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Merging => write!(f, "merging"),
            Self::Merged => write!(f, "merged"),
        }
    }
}

/// The columns written onto a secondary record when it is tombstoned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TombstoneMark {
    pub merged_into_client_id: ClientId,
    pub merged_at: DateTime<Utc>,
    pub merged_by: ActorId,
}

/// A client (customer) row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: ClientId,
    pub organization_id: OrganizationId,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub notes: Option<String>,
    pub marketing_opt_in: bool,
    /// Identifier of this client in the external point-of-sale system.
    pub external_id: Option<String>,
    pub status: ClientStatus,
    pub is_active: bool,
    /// Set only when `status == Merged`.
    pub merged_into_client_id: Option<ClientId>,
    pub merged_at: Option<DateTime<Utc>>,
    pub merged_by: Option<ActorId>,
    pub updated_at: DateTime<Utc>,
}

impl ClientRecord {
    /// A fresh active record, as produced by client intake.
    pub fn new(
        organization_id: OrganizationId,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            id: ClientId::new(),
            organization_id,
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: None,
            phone: None,
            birthday: None,
            notes: None,
            marketing_opt_in: false,
            external_id: None,
            status: ClientStatus::Active,
            is_active: true,
            merged_into_client_id: None,
            merged_at: None,
            merged_by: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_merged(&self) -> bool {
        self.status == ClientStatus::Merged
    }

    /// Returns `true` if this record is a tombstone pointing at `primary`.
    pub fn is_merged_into(&self, primary: &ClientId) -> bool {
        self.is_merged() && self.merged_into_client_id.as_ref() == Some(primary)
    }

    /// Turn this record into a tombstone linked to its canonical record.
    pub fn apply_tombstone(&mut self, mark: &TombstoneMark) {
        self.status = ClientStatus::Merged;
        self.is_active = false;
        self.merged_into_client_id = Some(mark.merged_into_client_id);
        self.merged_at = Some(mark.merged_at);
        self.merged_by = Some(mark.merged_by);
        self.updated_at = mark.merged_at;
    }
}
