//! Append-only merge audit log for the client identity merge engine.
//!
//! This crate provides:
//! - `MergeLog` and `UndoRecord` entry types with hash-linked integrity
//! - `AuditWriter` / `AuditReader` trait boundaries
//! - `InMemoryAuditLog` implementation for tests, the CLI, and embedding
//! - Chain validation (sequence, hash links, undo attribution)
//!
//! Each organization has its own chain. A merge log is written once and never
//! mutated; reversing a merge appends an `UndoRecord` to the same chain.

pub mod error;
pub mod memory;
pub mod records;
pub mod traits;
pub mod validation;

pub use error::AuditError;
pub use memory::InMemoryAuditLog;
pub use records::{
    AuditEntry, EntryKind, MergeLog, MergeLogDraft, ReparentedRow, UndoDraft, UndoRecord,
};
pub use traits::{AuditLog, AuditReader, AuditWriter};
pub use validation::{compute_entry_hash, ChainValidator, ValidationReport, Violation, ViolationKind};
