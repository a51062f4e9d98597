use std::sync::Arc;

use tokio::net::TcpListener;

use crate::auth::StaticTokenAuth;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::fixture::{FixtureBackend, SalonFixture};
use crate::handler::AppState;
use crate::router::build_router;

/// Merge engine HTTP server.
pub struct MergeServer {
    config: ServerConfig,
    backend: FixtureBackend,
}

impl MergeServer {
    pub fn new(config: ServerConfig, backend: FixtureBackend) -> Self {
        Self { config, backend }
    }

    /// Build a server over the fixture named in `config`, or an empty
    /// backend if it names none.
    pub fn from_config(config: ServerConfig) -> ServerResult<Self> {
        config
            .engine
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;
        let fixture = match &config.fixture {
            Some(path) => SalonFixture::load(path)?,
            None => SalonFixture::default(),
        };
        let backend = FixtureBackend::from_fixture(&fixture)?;
        Ok(Self::new(config, backend))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn backend(&self) -> &FixtureBackend {
        &self.backend
    }

    pub fn state(&self) -> AppState {
        let engine = self
            .backend
            .engine(self.config.engine.clone(), self.config.gate.clone());
        AppState::new(
            Arc::new(engine),
            Arc::new(StaticTokenAuth::new(self.config.tokens.clone())),
        )
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.state())
    }

    /// Start serving requests.
    pub async fn serve(self) -> ServerResult<()> {
        let app = self.router();
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        tracing::info!(
            addr = %self.config.bind_addr,
            tokens = self.config.tokens.len(),
            "merge server listening"
        );
        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}
