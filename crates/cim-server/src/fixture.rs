//! JSON fixture documents and the in-memory backend built from them.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use cim_audit::{AuditEntry, InMemoryAuditLog};
use cim_engine::{EngineConfig, MergeEngine};
use cim_gate::{GateConfig, InMemoryRoleDirectory, PermissionGate, RoleGrant};
use cim_store::{DatastoreFixture, InMemoryDatastore};

use crate::error::{ServerError, ServerResult};

/// Everything a merge engine runs against: client rows, dependent and
/// balance tables, role grants, and prior audit entries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SalonFixture {
    #[serde(flatten)]
    pub datastore: DatastoreFixture,
    #[serde(default)]
    pub role_grants: Vec<RoleGrant>,
    #[serde(default)]
    pub audit_entries: Vec<AuditEntry>,
}

impl SalonFixture {
    pub fn from_json(data: &str) -> ServerResult<Self> {
        serde_json::from_str(data).map_err(|e| ServerError::Fixture(e.to_string()))
    }

    pub fn load(path: &Path) -> ServerResult<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn to_json_pretty(&self) -> ServerResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ServerError::Fixture(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> ServerResult<()> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}

/// The in-memory datastore, role directory, and audit log behind one engine.
#[derive(Clone)]
pub struct FixtureBackend {
    pub store: Arc<InMemoryDatastore>,
    pub directory: Arc<InMemoryRoleDirectory>,
    pub audit: Arc<InMemoryAuditLog>,
}

impl FixtureBackend {
    pub fn from_fixture(fixture: &SalonFixture) -> ServerResult<Self> {
        let store = InMemoryDatastore::from_fixture(&fixture.datastore)
            .map_err(|e| ServerError::Fixture(e.to_string()))?;
        let audit = InMemoryAuditLog::from_entries(fixture.audit_entries.iter().cloned())
            .map_err(|e| ServerError::Fixture(e.to_string()))?;
        Ok(Self {
            store: Arc::new(store),
            directory: Arc::new(InMemoryRoleDirectory::from_grants(
                fixture.role_grants.iter().cloned(),
            )),
            audit: Arc::new(audit),
        })
    }

    /// Export the current state as a fixture document.
    pub fn to_fixture(&self) -> ServerResult<SalonFixture> {
        Ok(SalonFixture {
            datastore: self
                .store
                .to_fixture()
                .map_err(|e| ServerError::Fixture(e.to_string()))?,
            role_grants: self.directory.all_grants(),
            audit_entries: self
                .audit
                .export()
                .map_err(|e| ServerError::Fixture(e.to_string()))?,
        })
    }

    pub fn engine(&self, engine: EngineConfig, gate: GateConfig) -> MergeEngine {
        let gate = PermissionGate::with_default_stages(gate, self.directory.clone());
        MergeEngine::new(self.store.clone(), Arc::new(gate), self.audit.clone()).with_config(engine)
    }
}
