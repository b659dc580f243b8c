//! TCP listener and connection handling.
//!
//! One listener per route. Each accepted client gets its own task which
//! acquires a backend connection from the route controller, runs the duplex
//! copy, and releases the connection.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn, Instrument};

use super::copy::proxy_bidirectional;
use crate::lifecycle::ControllerHandle;

/// Default maximum concurrent connections per listener.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Default time a client may wait for its backend connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(180);

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Deadline for each Acquire.
    pub acquire_timeout: Duration,
}

impl ListenerConfig {
    /// Create a new listener configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Connections currently being handled.
    pub connections_active: AtomicU64,
    /// Connections rejected due to max limit.
    pub connections_rejected: AtomicU64,
    /// Clients closed because no backend connection could be acquired.
    pub acquire_failed: AtomicU64,
    /// Bytes proxied to backend.
    pub bytes_to_backend: AtomicU64,
    /// Bytes proxied from backend.
    pub bytes_from_backend: AtomicU64,
}

/// A route's TCP listener.
pub struct Listener {
    config: ListenerConfig,
    listener: TcpListener,
    controller: ControllerHandle,
    conn_semaphore: Arc<Semaphore>,
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind the listener.
    pub async fn bind(config: ListenerConfig, controller: ControllerHandle) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            route = %controller.route(),
            bind_addr = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            conn_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            listener,
            config,
            controller,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get listener statistics.
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Accept connections until `shutdown` flips to true.
    ///
    /// Accept errors are logged and never end the loop.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(route = %self.controller.route(), bind_addr = %local_addr, "Listener started");

        loop {
            let accepted = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(route = %self.controller.route(), "Listener shutting down");
                        return Ok(());
                    }
                    continue;
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    let permit = match self.conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.stats
                                .connections_rejected
                                .fetch_add(1, Ordering::Relaxed);
                            warn!(
                                peer_addr = %peer_addr,
                                "Connection rejected: max connections reached"
                            );
                            continue;
                        }
                    };

                    self.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .connections_active
                        .fetch_add(1, Ordering::Relaxed);

                    let listener = Arc::clone(&self);
                    let span = tracing::info_span!(
                        "connection",
                        route = %self.controller.route(),
                        peer = %peer_addr
                    );

                    tokio::spawn(
                        async move {
                            listener.handle_connection(stream, peer_addr).await;
                            listener
                                .stats
                                .connections_active
                                .fetch_sub(1, Ordering::Relaxed);
                            drop(permit);
                        }
                        .instrument(span),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    // Brief sleep to avoid tight loop on persistent errors
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Handle a single client connection.
    async fn handle_connection(&self, mut client: TcpStream, peer_addr: SocketAddr) {
        debug!(peer_addr = %peer_addr, "Handling connection");

        let mut lease = match self.controller.acquire(self.config.acquire_timeout).await {
            Ok(lease) => lease,
            Err(e) => {
                self.stats.acquire_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    peer_addr = %peer_addr,
                    reason = e.reason_code(),
                    error = %e,
                    "No backend connection, closing client"
                );
                return;
            }
        };

        let _ = client.set_nodelay(true);
        info!(
            peer_addr = %peer_addr,
            backend_addr = ?lease.peer_addr().ok(),
            "Proxying client"
        );

        let totals = proxy_bidirectional(&mut client, lease.stream_mut()).await;

        self.stats
            .bytes_to_backend
            .fetch_add(totals.client_to_backend, Ordering::Relaxed);
        self.stats
            .bytes_from_backend
            .fetch_add(totals.backend_to_client, Ordering::Relaxed);

        self.controller.release(lease);

        info!(
            peer_addr = %peer_addr,
            bytes_to_backend = totals.client_to_backend,
            bytes_from_backend = totals.backend_to_client,
            "Connection closed"
        );
    }
}
