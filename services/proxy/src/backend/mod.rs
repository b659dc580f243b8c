//! Backend lifecycle mechanics.
//!
//! This module provides:
//! - The `Backend` capability trait (start, stop, dial)
//! - `BackendOperator`: reachability probing, readiness polling and the idle
//!   shutdown timer for one backend
//! - `TcpBackend`: a TCP endpoint whose lifecycle is driven by a control plane
//! - `MockBackend`: scripted backend for tests and local runs
//!
//! The operator knows nothing about players or sessions; that accounting
//! lives in the route controller.

pub mod mock;
mod operator;
mod tcp;
mod timer;

use std::io;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::net::TcpStream;

pub use mock::MockBackend;
pub use operator::{BackendOperator, OperatorSettings, ReadinessError};
pub use tcp::TcpBackend;
pub use timer::ShutdownTimer;

/// What the operator needs from a managed backend.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Backend endpoint, for logs.
    fn endpoint(&self) -> String;

    /// Ask the control plane to start the backend.
    async fn start(&self) -> Result<()>;

    /// Ask the control plane to stop the backend.
    async fn stop(&self) -> Result<()>;

    /// Open one connection to the backend.
    async fn dial(&self) -> io::Result<TcpStream>;
}

#[async_trait]
impl<T: Backend> Backend for Arc<T> {
    fn endpoint(&self) -> String {
        (**self).endpoint()
    }

    async fn start(&self) -> Result<()> {
        (**self).start().await
    }

    async fn stop(&self) -> Result<()> {
        (**self).stop().await
    }

    async fn dial(&self) -> io::Result<TcpStream> {
        (**self).dial().await
    }
}
