//! Built-in gate stages.

pub mod permission;
pub mod validation;

pub use permission::PermissionStage;
pub use validation::ValidationStage;
