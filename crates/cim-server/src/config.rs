use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cim_engine::EngineConfig;
use cim_gate::GateConfig;
use cim_types::ActorId;

use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// JSON fixture the in-memory datastore, role directory, and audit log
    /// are loaded from at startup.
    pub fixture: Option<PathBuf>,
    /// Bearer token -> the actor it authenticates.
    pub tokens: BTreeMap<String, ActorId>,
    pub engine: EngineConfig,
    pub gate: GateConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            fixture: None,
            tokens: BTreeMap::new(),
            engine: EngineConfig::default(),
            gate: GateConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(data: &str) -> ServerResult<Self> {
        let config: Self = toml::from_str(data).map_err(|e| ServerError::Config(e.to_string()))?;
        config
            .engine
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn load(path: &Path) -> ServerResult<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_toml_str(&data)
    }
}
