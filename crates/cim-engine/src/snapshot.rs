use std::collections::BTreeMap;

use cim_store::Datastore;
use cim_types::{ClientId, ClientSnapshot, OrganizationId};

use crate::error::{MergeError, MergeResult};
use crate::registry::TableRegistry;

/// Reads the full pre-merge state of every involved client.
pub struct SnapshotCapturer<'a> {
    store: &'a dyn Datastore,
    registry: &'a TableRegistry,
    enforce_tenant_isolation: bool,
}

impl<'a> SnapshotCapturer<'a> {
    pub fn new(store: &'a dyn Datastore, registry: &'a TableRegistry) -> Self {
        Self {
            store,
            registry,
            enforce_tenant_isolation: true,
        }
    }

    pub fn enforce_tenant_isolation(mut self, enforce: bool) -> Self {
        self.enforce_tenant_isolation = enforce;
        self
    }

    /// Capture the primary and every secondary.
    ///
    /// Fails with `ClientNotFound` before anything is written if an id does
    /// not resolve to a record in `organization`. A balance table that
    /// cannot be read is left out of the snapshot; the reconciler will skip
    /// it for the same reason.
    pub fn capture(
        &self,
        organization: &OrganizationId,
        primary: &ClientId,
        secondaries: &[ClientId],
    ) -> MergeResult<BTreeMap<ClientId, ClientSnapshot>> {
        let ids: Vec<ClientId> = std::iter::once(*primary)
            .chain(secondaries.iter().copied())
            .collect();

        let mut snapshots = BTreeMap::new();
        for (id, record) in ids.iter().zip(self.store.get_clients(&ids)?) {
            let record = record.ok_or(MergeError::ClientNotFound(*id))?;
            if self.enforce_tenant_isolation && record.organization_id != *organization {
                tracing::warn!(
                    client = %id,
                    organization = %organization,
                    "client belongs to another organization"
                );
                return Err(MergeError::ClientNotFound(*id));
            }

            let mut snapshot = ClientSnapshot::new(record);
            for (entry, _) in self.registry.balance_tables() {
                match self.store.read_balance(&entry.table, id) {
                    Ok(Some(row)) => {
                        snapshot.balances.insert(entry.label.clone(), row);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::debug!(table = entry.label.as_str(), error = %err, "balance not captured");
                    }
                }
            }
            snapshots.insert(*id, snapshot);
        }
        Ok(snapshots)
    }
}
