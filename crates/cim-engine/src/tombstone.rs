use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use cim_store::Datastore;
use cim_types::{ActorId, ClientId, TombstoneMark};

use crate::error::{MergeError, MergeResult};
use crate::lease::MergeLease;

/// What the tombstone step got done, whether or not it finished.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tombstoned {
    /// Secondaries marked as merged, in the order they were written.
    pub clients: Vec<ClientId>,
    /// Record that had been merged into a secondary -> that secondary. Each
    /// now points at the primary.
    pub relinked: BTreeMap<ClientId, ClientId>,
}

/// Marks secondaries as merged into the primary.
pub struct TombstoneWriter<'a> {
    store: &'a dyn Datastore,
}

impl<'a> TombstoneWriter<'a> {
    pub fn new(store: &'a dyn Datastore) -> Self {
        Self { store }
    }

    /// Tombstone each leased secondary. Records are never deleted; each one
    /// keeps a link to the primary so stale references can be followed.
    ///
    /// Records already merged into a secondary are re-pointed at the primary
    /// before that secondary is tombstoned, so a merged record always links
    /// to an active one. Progress is recorded in `done` as it happens and is
    /// left there when a write fails.
    pub fn write(
        &self,
        lease: &mut MergeLease<'_>,
        primary: &ClientId,
        secondaries: &[ClientId],
        actor: &ActorId,
        at: DateTime<Utc>,
        done: &mut Tombstoned,
    ) -> MergeResult<()> {
        let mark = TombstoneMark {
            merged_into_client_id: *primary,
            merged_at: at,
            merged_by: *actor,
        };
        for id in secondaries {
            let earlier = self.store.merged_into(id).map_err(MergeError::Tombstone)?;
            for record in earlier {
                if self
                    .store
                    .relink(&record, id, primary)
                    .map_err(MergeError::Tombstone)?
                {
                    tracing::debug!(client = %record, from = %id, "merged record relinked to primary");
                    done.relinked.insert(record, *id);
                }
            }
            self.store.tombstone(id, &mark).map_err(MergeError::Tombstone)?;
            lease.hand_back(id);
            done.clients.push(*id);
        }
        Ok(())
    }
}
