//! TCP backend whose lifecycle is driven by a control plane.

use std::io;

use anyhow::Result;
use async_trait::async_trait;
use tokio::net::TcpStream;

use super::Backend;
use crate::control::ControlPlane;

/// A backend reached at `host:port` and started/stopped through `C`.
pub struct TcpBackend<C: ControlPlane> {
    endpoint: String,
    control: C,
}

impl<C: ControlPlane> TcpBackend<C> {
    pub fn new(endpoint: impl Into<String>, control: C) -> Self {
        Self {
            endpoint: endpoint.into(),
            control,
        }
    }
}

#[async_trait]
impl<C: ControlPlane> Backend for TcpBackend<C> {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn start(&self) -> Result<()> {
        self.control.start().await
    }

    async fn stop(&self) -> Result<()> {
        self.control.stop().await
    }

    async fn dial(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(self.endpoint.as_str()).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
