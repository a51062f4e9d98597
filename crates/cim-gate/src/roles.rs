use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use cim_types::{ActorId, OrganizationId};

use crate::error::GateError;

/// A role held by an actor, either within one organization or, when
/// `organization_id` is `None`, across all organizations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub actor_id: ActorId,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl RoleGrant {
    /// An organization-scoped role carrying the given permissions.
    pub fn scoped(
        actor_id: ActorId,
        organization_id: OrganizationId,
        role: impl Into<String>,
        permissions: &[&str],
    ) -> Self {
        Self {
            actor_id,
            organization_id: Some(organization_id),
            role: role.into(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// A cross-organization role.
    pub fn global(actor_id: ActorId, role: impl Into<String>) -> Self {
        Self {
            actor_id,
            organization_id: None,
            role: role.into(),
            permissions: Vec::new(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.organization_id.is_none()
    }

    pub fn grants(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Read-only lookup of the roles an actor holds.
pub trait RoleDirectory: Send + Sync {
    /// Every grant held by `actor`, in any organization.
    fn grants_for(&self, actor: &ActorId) -> Result<Vec<RoleGrant>, GateError>;
}

/// An in-memory implementation of [`RoleDirectory`].
#[derive(Debug, Default)]
pub struct InMemoryRoleDirectory {
    grants: RwLock<HashMap<ActorId, Vec<RoleGrant>>>,
}

impl InMemoryRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_grants(grants: impl IntoIterator<Item = RoleGrant>) -> Self {
        let directory = Self::new();
        for grant in grants {
            directory.grant(grant);
        }
        directory
    }

    pub fn grant(&self, grant: RoleGrant) {
        if let Ok(mut map) = self.grants.write() {
            map.entry(grant.actor_id).or_default().push(grant);
        }
    }

    pub fn all_grants(&self) -> Vec<RoleGrant> {
        self.grants
            .read()
            .map(|map| map.values().flatten().cloned().collect())
            .unwrap_or_default()
    }
}

impl RoleDirectory for InMemoryRoleDirectory {
    fn grants_for(&self, actor: &ActorId) -> Result<Vec<RoleGrant>, GateError> {
        let map = self
            .grants
            .read()
            .map_err(|e| GateError::RoleLookup(format!("lock poisoned: {e}")))?;
        Ok(map.get(actor).cloned().unwrap_or_default())
    }
}
