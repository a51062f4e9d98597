use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use cim_audit::MergeLog;
use cim_engine::{MergeEngine, MergeRequest};
use cim_types::{
    ActorId, ClientId, ClientSnapshot, FieldResolutions, MergeLogId, OrganizationId,
};

use crate::auth::{AuthProvider, Credentials};
use crate::error::{ServerError, ServerResult};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MergeEngine>,
    pub auth: Arc<dyn AuthProvider>,
}

impl AppState {
    pub fn new(engine: Arc<MergeEngine>, auth: Arc<dyn AuthProvider>) -> Self {
        Self { engine, auth }
    }

    async fn actor(&self, headers: &HeaderMap) -> ServerResult<ActorId> {
        let header = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        self.auth
            .authenticate(&Credentials::from_authorization(header))
            .await
    }

    /// Run a blocking engine call off the async runtime.
    async fn run<T, F>(&self, call: F) -> ServerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&MergeEngine) -> cim_engine::MergeResult<T> + Send + 'static,
    {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || call(&engine))
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?
            .map_err(ServerError::from)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub success: bool,
    pub merge_log_id: MergeLogId,
    pub reparenting_counts: BTreeMap<String, u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoBody {
    pub organization_id: OrganizationId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoResponse {
    pub success: bool,
    pub undone_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQuery {
    pub organization_id: OrganizationId,
}

/// A stored merge log as callers see it. Skip reasons and row-level detail
/// stay server-side.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeLogView {
    pub id: MergeLogId,
    pub organization_id: OrganizationId,
    pub primary_client_id: ClientId,
    pub secondary_client_ids: Vec<ClientId>,
    pub performed_by: ActorId,
    pub field_resolutions: FieldResolutions,
    pub before_snapshots: BTreeMap<ClientId, ClientSnapshot>,
    pub reparenting_counts: BTreeMap<String, u64>,
    /// The interrupted merge this one finished, if any.
    pub resumes: Option<MergeLogId>,
    pub created_at: DateTime<Utc>,
    pub undo_expires_at: DateTime<Utc>,
}

impl From<MergeLog> for MergeLogView {
    fn from(log: MergeLog) -> Self {
        Self {
            id: log.id,
            organization_id: log.organization_id,
            primary_client_id: log.primary_client_id,
            secondary_client_ids: log.secondary_client_ids,
            performed_by: log.performed_by,
            field_resolutions: log.field_resolutions,
            before_snapshots: log.before_snapshots,
            reparenting_counts: log.reparenting_counts,
            resumes: log.resumes,
            created_at: log.created_at,
            undo_expires_at: log.undo_expires_at,
        }
    }
}

pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn merge_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<MergeRequest>, JsonRejection>,
) -> ServerResult<Json<MergeResponse>> {
    let actor = state.actor(&headers).await?;
    let Json(request) = body.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let summary = state.run(move |engine| engine.merge(&actor, &request)).await?;
    Ok(Json(MergeResponse {
        success: true,
        merge_log_id: summary.merge_log_id,
        reparenting_counts: summary.reparenting_counts,
    }))
}

pub async fn undo_handler(
    State(state): State<AppState>,
    Path(id): Path<MergeLogId>,
    headers: HeaderMap,
    body: Result<Json<UndoBody>, JsonRejection>,
) -> ServerResult<Json<UndoResponse>> {
    let actor = state.actor(&headers).await?;
    let Json(body) = body.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let summary = state
        .run(move |engine| engine.undo(&actor, &body.organization_id, &id))
        .await?;
    Ok(Json(UndoResponse {
        success: true,
        undone_at: summary.undone_at,
    }))
}

pub async fn merge_log_handler(
    State(state): State<AppState>,
    Path(id): Path<MergeLogId>,
    Query(query): Query<LogQuery>,
    headers: HeaderMap,
) -> ServerResult<Json<MergeLogView>> {
    let actor = state.actor(&headers).await?;
    let log = state
        .run(move |engine| engine.merge_log(&actor, &query.organization_id, &id))
        .await?;
    Ok(Json(log.into()))
}
