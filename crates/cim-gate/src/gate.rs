use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::GateConfig;
use crate::error::GateError;
use crate::roles::RoleDirectory;
use crate::stage::{DenialKind, GateContext, GateRequest, GateStage, StageDecision, StageResult};
use crate::stages::{PermissionStage, ValidationStage};

// ---------------------------------------------------------------------------
// GateResult
// ---------------------------------------------------------------------------

/// Final decision of the gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Denied { kind: DenialKind, reason: String },
}

/// The outcome of running a request through the full gate pipeline.
#[derive(Clone, Debug)]
pub struct GateResult {
    pub decision: GateDecision,
    /// Per-stage results in evaluation order.
    pub stage_results: Vec<StageResult>,
    /// Total wall-clock time for the pipeline evaluation.
    pub elapsed: Duration,
}

impl GateResult {
    /// Returns `true` if the request was allowed.
    pub fn is_allowed(&self) -> bool {
        self.decision == GateDecision::Allowed
    }
}

// ---------------------------------------------------------------------------
// PermissionGate
// ---------------------------------------------------------------------------

/// The permission gate: a pipeline of read-only stages that every merge and
/// undo request passes through before anything is written.
pub struct PermissionGate {
    stages: Vec<Box<dyn GateStage>>,
    config: GateConfig,
    directory: Arc<dyn RoleDirectory>,
}

impl PermissionGate {
    /// Create a gate with an empty pipeline.
    pub fn new(config: GateConfig, directory: Arc<dyn RoleDirectory>) -> Self {
        Self {
            stages: Vec::new(),
            config,
            directory,
        }
    }

    /// Create a gate with the default pipeline: Permission -> Validation.
    ///
    /// A caller without the permission is refused before anything about the
    /// request's shape is reported back.
    pub fn with_default_stages(config: GateConfig, directory: Arc<dyn RoleDirectory>) -> Self {
        let mut gate = Self::new(config, directory);
        gate.add_stage(Box::new(PermissionStage));
        gate.add_stage(Box::new(ValidationStage));
        gate
    }

    /// Append a stage to the end of the pipeline.
    pub fn add_stage(&mut self, stage: Box<dyn GateStage>) {
        self.stages.push(stage);
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Evaluate a request through the full pipeline.
    ///
    /// The pipeline is fail-fast: the first stage that fails stops evaluation
    /// and produces a `Denied` decision.
    pub fn evaluate(&self, request: &GateRequest) -> Result<GateResult, GateError> {
        let pipeline_start = Instant::now();
        let grants = self.directory.grants_for(&request.actor)?;
        let mut context = GateContext::new(&self.config, grants);
        let mut stage_results = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let stage_start = Instant::now();
            let decision = stage.evaluate(request, &context)?;

            let result = StageResult {
                stage_name: stage.name().to_string(),
                passed: decision.is_pass(),
                reason: match &decision {
                    StageDecision::Pass => None,
                    StageDecision::Fail { reason, .. } => Some(reason.clone()),
                },
                elapsed: stage_start.elapsed(),
            };
            stage_results.push(result.clone());
            context.previous_stages.push(result);

            if let StageDecision::Fail { kind, reason } = decision {
                tracing::info!(
                    actor = %request.actor,
                    organization = %request.organization_id,
                    stage = stage.name(),
                    %reason,
                    "gate denied request"
                );
                return Ok(GateResult {
                    decision: GateDecision::Denied { kind, reason },
                    stage_results,
                    elapsed: pipeline_start.elapsed(),
                });
            }
        }

        Ok(GateResult {
            decision: GateDecision::Allowed,
            stage_results,
            elapsed: pipeline_start.elapsed(),
        })
    }
}
