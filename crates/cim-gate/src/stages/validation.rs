use std::collections::HashSet;

use crate::error::GateError;
use crate::stage::{GateContext, GateOperation, GateRequest, GateStage, StageDecision};

/// Structural validation stage.
///
/// Checks that a merge request names at least one secondary, no duplicates,
/// does not list the primary among its secondaries, and stays within the
/// configured batch size.
pub struct ValidationStage;

impl GateStage for ValidationStage {
    fn name(&self) -> &str {
        "validation"
    }

    fn evaluate(
        &self,
        request: &GateRequest,
        context: &GateContext<'_>,
    ) -> Result<StageDecision, GateError> {
        let GateOperation::Merge {
            primary,
            secondaries,
        } = &request.operation
        else {
            return Ok(StageDecision::Pass);
        };

        if secondaries.is_empty() {
            return Ok(StageDecision::invalid(
                "at least one secondary client id is required",
            ));
        }

        let max = context.config.max_secondaries;
        if secondaries.len() > max {
            return Ok(StageDecision::invalid(format!(
                "too many secondary clients: {} exceeds maximum of {max}",
                secondaries.len()
            )));
        }

        if secondaries.contains(primary) {
            return Ok(StageDecision::invalid(format!(
                "primary client {primary} is also listed as a secondary"
            )));
        }

        let mut seen = HashSet::with_capacity(secondaries.len());
        for id in secondaries {
            if !seen.insert(id) {
                return Ok(StageDecision::invalid(format!(
                    "secondary client {id} is listed more than once"
                )));
            }
        }

        Ok(StageDecision::Pass)
    }
}
