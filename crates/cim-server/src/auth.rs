use std::collections::BTreeMap;

use async_trait::async_trait;

use cim_types::ActorId;

use crate::error::{ServerError, ServerResult};

/// What a request presented to identify its actor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    Bearer(String),
    Anonymous,
}

impl Credentials {
    /// Parse an `Authorization` header value.
    pub fn from_authorization(header: Option<&str>) -> Self {
        match header.and_then(|h| h.strip_prefix("Bearer ")) {
            Some(token) if !token.trim().is_empty() => Self::Bearer(token.trim().to_string()),
            _ => Self::Anonymous,
        }
    }
}

/// Resolves request credentials to the acting staff member.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<ActorId>;
}

/// Fixed token table, loaded from configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenAuth {
    tokens: BTreeMap<String, ActorId>,
}

impl StaticTokenAuth {
    pub fn new(tokens: BTreeMap<String, ActorId>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl AuthProvider for StaticTokenAuth {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<ActorId> {
        match credentials {
            Credentials::Bearer(token) => self
                .tokens
                .get(token)
                .copied()
                .ok_or_else(|| ServerError::AuthFailed("unknown bearer token".into())),
            Credentials::Anonymous => Err(ServerError::AuthFailed("missing bearer token".into())),
        }
    }
}
