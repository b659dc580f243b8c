//! Test harness for proxy integration tests.
//!
//! Provides helpers to spawn TCP echo backends, route controllers over a
//! scripted backend, and full routes (listener + controller) on loopback.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::time::{sleep, Instant};

use idlegate_proxy::actors::Supervisor;
use idlegate_proxy::lifecycle::RouteController;
use idlegate_proxy::{
    launch_route, BackendOperator, ControllerHandle, ControllerSnapshot, LifecycleState,
    MockBackend, OperatorSettings, RouteHandle, RouteSettings,
};

#[allow(dead_code)]
pub struct TcpEchoBackend {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicU64>,
    pub bytes_received: Arc<AtomicU64>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl TcpEchoBackend {
    pub async fn spawn() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicU64::new(0));
        let bytes_received = Arc::new(AtomicU64::new(0));

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let conn_clone = Arc::clone(&connections);
        let bytes_clone = Arc::clone(&bytes_received);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((mut stream, _)) => {
                                conn_clone.fetch_add(1, Ordering::Relaxed);
                                let bytes = Arc::clone(&bytes_clone);
                                tokio::spawn(async move {
                                    let mut buf = vec![0u8; 8192];
                                    loop {
                                        match stream.read(&mut buf).await {
                                            Ok(0) => break,
                                            Ok(n) => {
                                                bytes.fetch_add(n as u64, Ordering::Relaxed);
                                                if stream.write_all(&buf[..n]).await.is_err() {
                                                    break;
                                                }
                                            }
                                            Err(_) => break,
                                        }
                                    }
                                    let _ = stream.shutdown().await;
                                });
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            connections,
            bytes_received,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }
}

impl Drop for TcpEchoBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Short timings so lifecycle tests run in real time.
#[allow(dead_code)]
pub fn fast_settings(idle_timeout: Duration) -> OperatorSettings {
    let mut settings = OperatorSettings::new(idle_timeout, Duration::from_secs(2));
    settings.poll_interval = Duration::from_millis(20);
    settings.probe_timeout = Duration::from_millis(200);
    settings
}

/// A route controller over a shared `MockBackend`.
#[allow(dead_code)]
pub struct ControllerFixture {
    pub backend: Arc<MockBackend>,
    pub controller: ControllerHandle,
    pub supervisor: Supervisor,
}

#[allow(dead_code)]
impl ControllerFixture {
    pub fn spawn(backend: MockBackend, settings: OperatorSettings, autoshutdown: bool) -> Self {
        let backend = Arc::new(backend);
        let mut supervisor = Supervisor::new();
        let operator = BackendOperator::new("test-route", Arc::clone(&backend), settings);
        let controller =
            RouteController::start_loop(&mut supervisor, "test-route", operator, autoshutdown);

        Self {
            backend,
            controller,
            supervisor,
        }
    }

    pub async fn snapshot(&self) -> ControllerSnapshot {
        self.controller
            .snapshot()
            .await
            .expect("controller should be running")
    }

    pub async fn state(&self) -> LifecycleState {
        self.snapshot().await.state
    }

    /// Poll until the controller reaches `state`, failing after `within`.
    pub async fn wait_for_state(
        &self,
        state: LifecycleState,
        within: Duration,
    ) -> ControllerSnapshot {
        wait_for(&self.controller, state, within).await
    }
}

/// Poll `controller` until it reaches `state`, failing after `within`.
#[allow(dead_code)]
pub async fn wait_for(
    controller: &ControllerHandle,
    state: LifecycleState,
    within: Duration,
) -> ControllerSnapshot {
    let deadline = Instant::now() + within;
    loop {
        let snapshot = controller
            .snapshot()
            .await
            .expect("controller should be running");
        if snapshot.state == state {
            return snapshot;
        }
        assert!(
            Instant::now() < deadline,
            "controller stuck in {} waiting for {}",
            snapshot.state,
            state
        );
        sleep(Duration::from_millis(10)).await;
    }
}

/// A full route (listener + controller) over a `MockBackend` that forwards to
/// an echo server.
#[allow(dead_code)]
pub struct ProxyHandle {
    pub echo: TcpEchoBackend,
    pub backend: Arc<MockBackend>,
    pub route: RouteHandle,
    pub supervisor: Supervisor,
    shutdown_tx: watch::Sender<bool>,
}

#[allow(dead_code)]
impl ProxyHandle {
    pub async fn spawn(idle_timeout: Duration) -> io::Result<Self> {
        let echo = TcpEchoBackend::spawn().await?;
        let backend = Arc::new(MockBackend::new(echo.addr));

        let settings = RouteSettings {
            name: "echo".to_string(),
            listen: "127.0.0.1:0".parse().map_err(io::Error::other)?,
            backend: echo.addr.to_string(),
            server_port: echo.addr.port(),
            autoshutdown: true,
            acquire_timeout: Duration::from_secs(2),
            max_connections: 64,
            operator: fast_settings(idle_timeout),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut supervisor = Supervisor::new();
        let route =
            launch_route(&settings, Arc::clone(&backend), &mut supervisor, shutdown_rx).await?;

        Ok(Self {
            echo,
            backend,
            route,
            supervisor,
            shutdown_tx,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.route.listen_addr
    }

    pub async fn wait_for_state(
        &self,
        state: LifecycleState,
        within: Duration,
    ) -> ControllerSnapshot {
        wait_for(&self.route.controller, state, within).await
    }

    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        self.route.join().await;
        self.supervisor.stop_all(Duration::from_secs(1)).await;
    }
}
