//! Foundation types for the client identity merge engine.
//!
//! This crate provides the identity, record, and snapshot types shared by the
//! datastore, gate, audit, and engine crates. Every other crate in the
//! workspace depends on `cim-types`.
//!
//! # Key Types
//!
//! - [`ClientId`], [`OrganizationId`], [`ActorId`] -- UUID-backed identifiers
//! - [`MergeLogId`] -- UUID v7 (time-ordered) audit log identifier
//! - [`ClientRecord`] -- a customer row, including merge tombstone columns
//! - [`ClientStatus`] -- `active`, `merging` (locked), or `merged`
//! - [`FieldResolutions`] -- typed set of caller-chosen winning field values
//! - [`ClientSnapshot`] -- full pre-merge state of one client

pub mod client;
pub mod error;
pub mod identity;
pub mod resolution;
pub mod snapshot;

pub use client::{ClientRecord, ClientStatus, TombstoneMark};
pub use error::TypeError;
pub use identity::{ActorId, ClientId, MergeLogId, OrganizationId, RowId};
pub use resolution::{FieldResolutions, ResolvableField};
pub use snapshot::{BalanceRow, ClientSnapshot};
