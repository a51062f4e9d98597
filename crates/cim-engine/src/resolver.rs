use chrono::{DateTime, Utc};
use cim_store::Datastore;
use cim_types::{ClientId, ClientRecord, FieldResolutions};

use crate::error::{MergeError, MergeResult};

/// Writes caller-chosen winning values onto the primary record.
pub struct FieldResolver<'a> {
    store: &'a dyn Datastore,
}

impl<'a> FieldResolver<'a> {
    pub fn new(store: &'a dyn Datastore) -> Self {
        Self { store }
    }

    /// Apply `resolutions` to the primary as one update. Secondaries are
    /// never field-updated. Returns the updated record, or `None` when there
    /// was nothing to write.
    pub fn apply(
        &self,
        primary: &ClientId,
        resolutions: &FieldResolutions,
        at: DateTime<Utc>,
    ) -> MergeResult<Option<ClientRecord>> {
        if resolutions.is_empty() {
            return Ok(None);
        }
        let updated = self
            .store
            .update_resolvable_fields(primary, resolutions, at)
            .map_err(MergeError::FieldResolution)?;
        tracing::debug!(client = %primary, fields = resolutions.fields().len(), "fields resolved");
        Ok(Some(updated))
    }
}
