//! Permission gate for the client identity merge engine.
//!
//! Every merge and undo request passes through the gate before any record is
//! read for mutation. The gate runs a pipeline of read-only stages
//! (permission, then structural validation) and produces an allow/deny
//! decision with a per-stage trail.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use cim_gate::{GateConfig, GateRequest, InMemoryRoleDirectory, PermissionGate, RoleGrant};
//! use cim_types::{ActorId, ClientId, OrganizationId};
//!
//! let actor = ActorId::new();
//! let org = OrganizationId::new();
//! let directory = InMemoryRoleDirectory::from_grants([
//!     RoleGrant::scoped(actor, org, "owner", &["clients.merge"]),
//! ]);
//! let gate = PermissionGate::with_default_stages(GateConfig::default(), Arc::new(directory));
//! let request = GateRequest::merge(actor, org, ClientId::new(), vec![ClientId::new()]);
//! assert!(gate.evaluate(&request).unwrap().is_allowed());
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod roles;
pub mod stage;
pub mod stages;

pub use config::GateConfig;
pub use error::GateError;
pub use gate::{GateDecision, GateResult, PermissionGate};
pub use roles::{InMemoryRoleDirectory, RoleDirectory, RoleGrant};
pub use stage::{
    DenialKind, GateContext, GateOperation, GateRequest, GateStage, StageDecision, StageResult,
};
pub use stages::{PermissionStage, ValidationStage};
