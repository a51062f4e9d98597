use cim_store::Datastore;
use cim_types::{ClientId, ClientStatus};

use crate::error::{MergeError, MergeResult};

/// Exclusive hold on a set of client records for the length of one merge or
/// undo.
///
/// Each record is moved to `merging` by compare-and-set from the status it
/// was read in. Records still held when the lease is released or dropped are
/// moved back to that status.
pub struct MergeLease<'a> {
    store: &'a dyn Datastore,
    held: Vec<(ClientId, ClientStatus)>,
}

impl<'a> MergeLease<'a> {
    /// Claim every `(id, expected status)` pair, or none of them.
    pub fn acquire(
        store: &'a dyn Datastore,
        claims: &[(ClientId, ClientStatus)],
    ) -> MergeResult<Self> {
        let mut lease = Self {
            store,
            held: Vec::with_capacity(claims.len()),
        };
        for (id, expected) in claims {
            match store.compare_and_set_status(id, *expected, ClientStatus::Merging) {
                Ok(true) => lease.held.push((*id, *expected)),
                Ok(false) => {
                    return Err(MergeError::Conflict(format!(
                        "client {id} is no longer {expected}; another merge may be in progress"
                    )));
                }
                Err(err) => return Err(err.into()),
            }
        }
        tracing::debug!(records = lease.held.len(), "merge lease acquired");
        Ok(lease)
    }

    pub fn holds(&self, id: &ClientId) -> bool {
        self.held.iter().any(|(held, _)| held == id)
    }

    /// Stop tracking a record that has been moved out of `merging` by other
    /// means (tombstoned or restored).
    pub fn hand_back(&mut self, id: &ClientId) {
        self.held.retain(|(held, _)| held != id);
    }

    /// Move every record still held back to the status it was claimed from.
    pub fn release(mut self) {
        self.release_held();
    }

    fn release_held(&mut self) {
        for (id, original) in self.held.drain(..) {
            match self
                .store
                .compare_and_set_status(&id, ClientStatus::Merging, original)
            {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(client = %id, "lease release found record no longer merging")
                }
                Err(err) => tracing::warn!(client = %id, error = %err, "lease release failed"),
            }
        }
    }
}

impl Drop for MergeLease<'_> {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            self.release_held();
        }
    }
}
