//! Control-plane contract and the Crafty adapter.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use idlegate_crafty::CraftyClient;

/// Starts and stops one backend. Implementations handle their own auth.
#[async_trait]
pub trait ControlPlane: Send + Sync + 'static {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

/// One Crafty-managed server, identified by the port it listens on.
#[derive(Clone)]
pub struct CraftyServer {
    client: Arc<CraftyClient>,
    port: u16,
}

impl CraftyServer {
    pub fn new(client: Arc<CraftyClient>, port: u16) -> Self {
        Self { client, port }
    }
}

#[async_trait]
impl ControlPlane for CraftyServer {
    async fn start(&self) -> Result<()> {
        self.client
            .start_server(self.port)
            .await
            .with_context(|| format!("starting Crafty server on port {}", self.port))
    }

    async fn stop(&self) -> Result<()> {
        self.client
            .stop_server(self.port)
            .await
            .with_context(|| format!("stopping Crafty server on port {}", self.port))
    }
}
