//! HTTP server for the client identity merge engine.
//!
//! Exposes merge, undo, and merge log lookup over JSON, authenticating each
//! request's bearer token to a staff actor before handing it to the engine.

pub mod auth;
pub mod config;
pub mod error;
pub mod fixture;
pub mod handler;
pub mod router;
pub mod server;

pub use auth::{AuthProvider, Credentials, StaticTokenAuth};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use fixture::{FixtureBackend, SalonFixture};
pub use handler::{AppState, MergeLogView, MergeResponse, UndoResponse};
pub use server::MergeServer;

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use cim_gate::RoleGrant;
    use cim_store::{BalanceStore, ClientStore, DatastoreFixture};
    use cim_types::{ActorId, BalanceRow, ClientRecord, ClientStatus, OrganizationId};
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use super::*;

    const TOKEN: &str = "front-desk-token";
    const UNPRIVILEGED: &str = "stylist-token";

    struct Harness {
        app: Router,
        backend: FixtureBackend,
        org: OrganizationId,
        primary: ClientRecord,
        secondary: ClientRecord,
    }

    fn harness() -> Harness {
        let org = OrganizationId::new();
        let staff = ActorId::new();
        let primary = ClientRecord::new(org, "Jo", "Park");
        let secondary = ClientRecord::new(org, "Jo", "P.");
        let fixture = SalonFixture {
            datastore: DatastoreFixture {
                clients: vec![primary.clone(), secondary.clone()],
                ..Default::default()
            },
            role_grants: vec![RoleGrant::scoped(staff, org, "manager", &["clients.merge"])],
            audit_entries: Vec::new(),
        };
        let backend = FixtureBackend::from_fixture(&fixture).unwrap();
        backend
            .store
            .create_balance_table("client_balances", ["salon_credit_balance", "gift_card_balance"])
            .unwrap();
        backend
            .store
            .write_balance(
                "client_balances",
                &BalanceRow::new(secondary.id).with_amount("gift_card_balance", 2500),
            )
            .unwrap();

        let config = ServerConfig {
            tokens: BTreeMap::from([
                (TOKEN.to_string(), staff),
                (UNPRIVILEGED.to_string(), ActorId::new()),
            ]),
            ..Default::default()
        };
        let server = MergeServer::new(config, backend.clone());
        Harness {
            app: server.router(),
            backend,
            org,
            primary,
            secondary,
        }
    }

    fn post(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn merge_body(h: &Harness) -> Value {
        json!({
            "primaryClientId": h.primary.id,
            "secondaryClientIds": [h.secondary.id],
            "fieldResolutions": { "email": "jo@example.com" },
            "organizationId": h.org,
        })
    }

    #[tokio::test]
    async fn health_endpoint() {
        let h = harness();
        let response = h
            .app
            .oneshot(Request::builder().uri("/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn merge_returns_log_id_and_counts() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(post("/v1/clients/merge", Some(TOKEN), merge_body(&h)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert!(body["mergeLogId"].is_string());
        assert_eq!(body["reparentingCounts"]["client_balances"], 1);
        assert!(body.get("skippedTables").is_none());

        let secondary = h.backend.store.get_client(&h.secondary.id).unwrap().unwrap();
        assert_eq!(secondary.status, ClientStatus::Merged);
        let primary = h.backend.store.get_client(&h.primary.id).unwrap().unwrap();
        assert_eq!(primary.email.as_deref(), Some("jo@example.com"));
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let h = harness();
        let body = merge_body(&h);
        let response = h
            .app
            .oneshot(post("/v1/clients/merge", None, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn unknown_secondary_is_bad_request() {
        let h = harness();
        let mut body = merge_body(&h);
        body["secondaryClientIds"] = json!([cim_types::ClientId::new()]);
        let response = h
            .app
            .oneshot(post("/v1/clients/merge", Some(TOKEN), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(h.backend.audit.export().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_fields_are_bad_request() {
        let h = harness();
        let response = h
            .app
            .oneshot(post(
                "/v1/clients/merge",
                Some(TOKEN),
                json!({ "primaryClientId": h.primary.id }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unresolvable_field_is_bad_request() {
        let h = harness();
        let mut body = merge_body(&h);
        body["fieldResolutions"] = json!({ "favouriteColour": "teal" });
        let response = h
            .app
            .oneshot(post("/v1/clients/merge", Some(TOKEN), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn other_organization_is_forbidden() {
        let h = harness();
        let mut body = merge_body(&h);
        body["organizationId"] = json!(OrganizationId::new());
        let response = h
            .app
            .oneshot(post("/v1/clients/merge", Some(TOKEN), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn malformed_merge_without_permission_is_forbidden() {
        let h = harness();
        let mut body = merge_body(&h);
        body["secondaryClientIds"] = json!([]);
        let response = h
            .app
            .oneshot(post("/v1/clients/merge", Some(UNPRIVILEGED), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn busy_record_is_conflict() {
        let h = harness();
        h.backend
            .store
            .compare_and_set_status(&h.secondary.id, ClientStatus::Active, ClientStatus::Merging)
            .unwrap();
        let body = merge_body(&h);
        let response = h
            .app
            .oneshot(post("/v1/clients/merge", Some(TOKEN), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unwritable_audit_log_is_server_error() {
        let h = harness();
        h.backend.audit.set_read_only(true);
        let body = merge_body(&h);
        let response = h
            .app
            .oneshot(post("/v1/clients/merge", Some(TOKEN), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let secondary = h.backend.store.get_client(&h.secondary.id).unwrap().unwrap();
        assert!(secondary.is_merged());
    }

    #[tokio::test]
    async fn log_lookup_and_undo() {
        let h = harness();
        let merged = json_body(
            h.app
                .clone()
                .oneshot(post("/v1/clients/merge", Some(TOKEN), merge_body(&h)))
                .await
                .unwrap(),
        )
        .await;
        let id = merged["mergeLogId"].as_str().unwrap().to_string();

        let response = h
            .app
            .clone()
            .oneshot(get(&format!("/v1/merges/{id}?organizationId={}", h.org)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let log = json_body(response).await;
        assert_eq!(log["id"], id);
        assert!(log["beforeSnapshots"][h.secondary.id.to_string()].is_object());
        assert!(log.get("skippedTables").is_none());

        let elsewhere = h
            .app
            .clone()
            .oneshot(get(&format!(
                "/v1/merges/{id}?organizationId={}",
                OrganizationId::new()
            )))
            .await
            .unwrap();
        assert_ne!(elsewhere.status(), StatusCode::OK);

        let undo_uri = format!("/v1/merges/{id}/undo");
        let response = h
            .app
            .clone()
            .oneshot(post(&undo_uri, Some(TOKEN), json!({ "organizationId": h.org })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let undone = json_body(response).await;
        assert_eq!(undone["success"], true);
        assert!(undone["undoneAt"].is_string());

        let secondary = h.backend.store.get_client(&h.secondary.id).unwrap().unwrap();
        assert_eq!(secondary.status, ClientStatus::Active);

        let again = h
            .app
            .oneshot(post(&undo_uri, Some(TOKEN), json!({ "organizationId": h.org })))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::BAD_REQUEST);
    }
}
