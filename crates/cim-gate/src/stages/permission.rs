use crate::error::GateError;
use crate::stage::{GateContext, GateOperation, GateRequest, GateStage, StageDecision};

/// Permission stage.
///
/// Passes if the actor holds a role within the request's organization that
/// grants the required permission, or holds an elevated cross-organization
/// role.
pub struct PermissionStage;

impl GateStage for PermissionStage {
    fn name(&self) -> &str {
        "permission"
    }

    fn evaluate(
        &self,
        request: &GateRequest,
        context: &GateContext<'_>,
    ) -> Result<StageDecision, GateError> {
        let required = match request.operation {
            GateOperation::Merge { .. } | GateOperation::ReadLog { .. } => {
                &context.config.merge_permission
            }
            GateOperation::Undo { .. } => &context.config.undo_permission,
        };

        if let Some(grant) = context
            .grants_in(&request.organization_id)
            .find(|g| g.grants(required))
        {
            tracing::debug!(actor = %request.actor, role = %grant.role, "permission granted by organization role");
            return Ok(StageDecision::Pass);
        }

        if let Some(grant) = context.elevated_grant() {
            tracing::debug!(actor = %request.actor, role = %grant.role, "permission granted by elevated role");
            return Ok(StageDecision::Pass);
        }

        Ok(StageDecision::forbidden(format!(
            "actor {} lacks '{required}' in organization {}",
            request.actor, request.organization_id
        )))
    }
}
