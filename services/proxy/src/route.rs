//! Route wiring: one listener, one controller and one backend operator per
//! configured route.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::actors::Supervisor;
use crate::backend::{Backend, BackendOperator, OperatorSettings};
use crate::lifecycle::{ControllerHandle, RouteController};
use crate::proxy::{Listener, ListenerConfig, ListenerStats};

/// Fully resolved settings for one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSettings {
    pub name: String,
    pub listen: SocketAddr,
    /// Backend endpoint, `host:port`.
    pub backend: String,
    /// Port identifying the server to the control plane.
    pub server_port: u16,
    pub autoshutdown: bool,
    pub acquire_timeout: Duration,
    pub max_connections: usize,
    pub operator: OperatorSettings,
}

/// A running route.
pub struct RouteHandle {
    pub name: String,
    /// Address actually bound (differs from the configured one for port 0).
    pub listen_addr: SocketAddr,
    pub controller: ControllerHandle,
    pub stats: Arc<ListenerStats>,
    task: JoinHandle<()>,
}

impl RouteHandle {
    /// Wait for the listener task to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(route = %self.name, error = %e, "Listener task failed");
        }
    }
}

/// Start the controller for `settings` under `supervisor`, bind its listener
/// and start accepting clients until `shutdown` flips.
pub async fn launch_route<B: Backend>(
    settings: &RouteSettings,
    backend: B,
    supervisor: &mut Supervisor,
    shutdown: watch::Receiver<bool>,
) -> io::Result<RouteHandle> {
    let operator = BackendOperator::new(settings.name.clone(), backend, settings.operator);
    let controller =
        RouteController::start_loop(supervisor, &settings.name, operator, settings.autoshutdown);

    let mut listener_config = ListenerConfig::new(settings.listen);
    listener_config.max_connections = settings.max_connections;
    listener_config.acquire_timeout = settings.acquire_timeout;

    let listener = Arc::new(Listener::bind(listener_config, controller.clone()).await?);
    let listen_addr = listener.local_addr()?;
    let stats = listener.stats();

    info!(
        route = %settings.name,
        listen = %listen_addr,
        backend = %settings.backend,
        server_port = settings.server_port,
        autoshutdown = settings.autoshutdown,
        "Route launched"
    );

    let name = settings.name.clone();
    let task = tokio::spawn(async move {
        if let Err(e) = listener.run(shutdown).await {
            error!(route = %name, error = %e, "Listener error");
        }
    });

    Ok(RouteHandle {
        name: settings.name.clone(),
        listen_addr,
        controller,
        stats,
        task,
    })
}
