use std::time::Duration;

use serde::{Deserialize, Serialize};
use cim_types::{ActorId, ClientId, MergeLogId, OrganizationId};

use crate::config::GateConfig;
use crate::error::GateError;
use crate::roles::RoleGrant;

// ---------------------------------------------------------------------------
// GateRequest
// ---------------------------------------------------------------------------

/// The operation an actor is asking the gate to authorize.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateOperation {
    /// Merge `secondaries` into `primary`.
    Merge {
        primary: ClientId,
        secondaries: Vec<ClientId>,
    },
    /// Reverse a previously logged merge.
    Undo { merge_log_id: MergeLogId },
    /// Read a merge log.
    ReadLog { merge_log_id: MergeLogId },
}

/// Everything the gate needs to decide whether an operation may proceed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRequest {
    pub actor: ActorId,
    pub organization_id: OrganizationId,
    pub operation: GateOperation,
}

impl GateRequest {
    pub fn merge(
        actor: ActorId,
        organization_id: OrganizationId,
        primary: ClientId,
        secondaries: Vec<ClientId>,
    ) -> Self {
        Self {
            actor,
            organization_id,
            operation: GateOperation::Merge {
                primary,
                secondaries,
            },
        }
    }

    pub fn undo(actor: ActorId, organization_id: OrganizationId, merge_log_id: MergeLogId) -> Self {
        Self {
            actor,
            organization_id,
            operation: GateOperation::Undo { merge_log_id },
        }
    }

    pub fn read_log(
        actor: ActorId,
        organization_id: OrganizationId,
        merge_log_id: MergeLogId,
    ) -> Self {
        Self {
            actor,
            organization_id,
            operation: GateOperation::ReadLog { merge_log_id },
        }
    }
}

// ---------------------------------------------------------------------------
// StageDecision
// ---------------------------------------------------------------------------

/// Why a stage refused a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenialKind {
    /// The request itself is malformed.
    Invalid,
    /// The actor is not allowed to perform the operation.
    Forbidden,
}

/// The outcome of a single gate stage evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageDecision {
    /// The stage passed; proceed to the next stage.
    Pass,
    /// The stage refused the request.
    Fail { kind: DenialKind, reason: String },
}

impl StageDecision {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Fail {
            kind: DenialKind::Invalid,
            reason: reason.into(),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Fail {
            kind: DenialKind::Forbidden,
            reason: reason.into(),
        }
    }

    /// Returns `true` if the decision is `Pass`.
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    /// Returns `true` if the decision is `Fail`.
    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail { .. })
    }
}

// ---------------------------------------------------------------------------
// StageResult
// ---------------------------------------------------------------------------

/// Recorded result from a completed stage evaluation.
#[derive(Clone, Debug)]
pub struct StageResult {
    /// Name of the stage that produced this result.
    pub stage_name: String,
    /// Whether the stage passed.
    pub passed: bool,
    /// Populated on failure.
    pub reason: Option<String>,
    /// Wall-clock time the stage took to evaluate.
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// GateContext
// ---------------------------------------------------------------------------

/// Contextual information available to every gate stage.
pub struct GateContext<'a> {
    pub config: &'a GateConfig,
    /// Every role the actor holds, in any organization.
    pub grants: Vec<RoleGrant>,
    /// Results from stages that have already run in this evaluation.
    pub previous_stages: Vec<StageResult>,
}

impl<'a> GateContext<'a> {
    pub fn new(config: &'a GateConfig, grants: Vec<RoleGrant>) -> Self {
        Self {
            config,
            grants,
            previous_stages: Vec::new(),
        }
    }

    /// Grants scoped to `organization`.
    pub fn grants_in<'g>(
        &'g self,
        organization: &'g OrganizationId,
    ) -> impl Iterator<Item = &'g RoleGrant> + 'g {
        self.grants
            .iter()
            .filter(move |g| g.organization_id.as_ref() == Some(organization))
    }

    /// The first cross-organization grant whose role is configured as
    /// elevated.
    pub fn elevated_grant(&self) -> Option<&RoleGrant> {
        self.grants
            .iter()
            .find(|g| g.is_global() && self.config.is_elevated(&g.role))
    }
}

// ---------------------------------------------------------------------------
// GateStage trait
// ---------------------------------------------------------------------------

/// A single evaluation stage in the gate pipeline.
///
/// Stages are evaluated in order and are read-only: no stage may mutate any
/// client, balance, or dependent row.
pub trait GateStage: Send + Sync {
    /// Human-readable name of this stage (e.g., "validation", "permission").
    fn name(&self) -> &str;

    /// Evaluate the request and return a decision.
    fn evaluate(
        &self,
        request: &GateRequest,
        context: &GateContext<'_>,
    ) -> Result<StageDecision, GateError>;
}
