//! Datastore boundary for the client identity merge engine.
//!
//! The merge engine runs against a shared remote datastore that offers no
//! multi-table transaction. This crate models that boundary as three traits,
//! one per family of tables, and ships an in-memory backend used by tests,
//! the CLI, and embedded deployments.
//!
//! # Table Families
//!
//! - [`ClientStore`] -- the client rows themselves (fields, status, tombstone)
//! - [`ReferenceStore`] -- dependent tables holding a client foreign key
//! - [`BalanceStore`] -- per-client numeric balance rows
//!
//! # Design Rules
//!
//! 1. Every trait call is one independent write or read; nothing spans calls.
//! 2. Field resolution is a single-row update: all supplied values land or none do.
//! 3. Status transitions used for merge locking are compare-and-set.
//! 4. Client rows are never physically deleted.
//! 5. All backend errors are propagated to the caller, never swallowed here.

pub mod error;
pub mod fixture;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use fixture::{BalanceTableFixture, DatastoreFixture, FixtureRow, TableFixture};
pub use memory::{Fault, InMemoryDatastore};
pub use traits::{BalanceStore, ClientStore, Datastore, ReferenceStore, RowReference};
