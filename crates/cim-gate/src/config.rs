use serde::{Deserialize, Serialize};

/// Configuration for the permission gate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Permission a role must grant within the organization to merge clients.
    pub merge_permission: String,
    /// Permission required to reverse a merge inside its undo window.
    pub undo_permission: String,
    /// Role names that authorize merges in every organization.
    pub elevated_roles: Vec<String>,
    /// Maximum number of secondary records in one merge request.
    pub max_secondaries: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            merge_permission: "clients.merge".into(),
            undo_permission: "clients.merge".into(),
            elevated_roles: vec!["platform_admin".into()],
            max_secondaries: 25,
        }
    }
}

impl GateConfig {
    pub fn is_elevated(&self, role: &str) -> bool {
        self.elevated_roles.iter().any(|r| r == role)
    }
}
