//! Scripted backend for tests and local runs.
//!
//! Simulates the control plane side of a backend: slow starts, failing
//! starts and stops, probes that fail for a while after boot, and a backend
//! that dies. Dials go to a real TCP address once the backend is "up".

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

use super::Backend;

/// Mock backend that counts start, stop and dial calls.
#[derive(Debug)]
pub struct MockBackend {
    target: SocketAddr,
    /// Keeps a sink listener bound so dials succeed without anyone accepting.
    _sink: Option<TcpListener>,
    up: AtomicBool,
    start_delay: Duration,
    dial_delay: Duration,
    boot_probe_failures: u32,
    pending_probe_failures: AtomicU32,
    fail_starts: AtomicBool,
    fail_stops: AtomicBool,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
    dial_calls: AtomicU32,
}

impl MockBackend {
    /// A stopped backend that, once started, forwards dials to `target`.
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            _sink: None,
            up: AtomicBool::new(false),
            start_delay: Duration::ZERO,
            dial_delay: Duration::ZERO,
            boot_probe_failures: 0,
            pending_probe_failures: AtomicU32::new(0),
            fail_starts: AtomicBool::new(false),
            fail_stops: AtomicBool::new(false),
            start_calls: AtomicU32::new(0),
            stop_calls: AtomicU32::new(0),
            dial_calls: AtomicU32::new(0),
        }
    }

    /// A stopped backend backed by a local listener that never reads.
    pub async fn sink() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let mut backend = Self::new(listener.local_addr()?);
        backend._sink = Some(listener);
        Ok(backend)
    }

    /// Start out already running.
    pub fn running(self) -> Self {
        self.up.store(true, Ordering::SeqCst);
        self
    }

    /// Make every start call take `delay`.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Make every dial take `delay` before connecting.
    pub fn with_dial_delay(mut self, delay: Duration) -> Self {
        self.dial_delay = delay;
        self
    }

    /// After each successful start, refuse the first `failures` dials.
    pub fn with_boot_probe_failures(mut self, failures: u32) -> Self {
        self.boot_probe_failures = failures;
        self
    }

    pub fn with_failing_starts(self) -> Self {
        self.set_fail_starts(true);
        self
    }

    pub fn with_failing_stops(self) -> Self {
        self.fail_stops.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_fail_starts(&self, fail: bool) {
        self.fail_starts.store(fail, Ordering::SeqCst);
    }

    /// Simulate the backend process appearing or dying.
    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn dial_calls(&self) -> u32 {
        self.dial_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn endpoint(&self) -> String {
        self.target.to_string()
    }

    async fn start(&self) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        info!(target_addr = %self.target, "[MOCK] Starting backend");

        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if self.fail_starts.load(Ordering::SeqCst) {
            anyhow::bail!("Mock backend configured to fail starts");
        }

        self.pending_probe_failures
            .store(self.boot_probe_failures, Ordering::SeqCst);
        self.up.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        info!(target_addr = %self.target, "[MOCK] Stopping backend");

        if self.fail_stops.load(Ordering::SeqCst) {
            anyhow::bail!("Mock backend configured to fail stops");
        }

        self.up.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn dial(&self) -> io::Result<TcpStream> {
        self.dial_calls.fetch_add(1, Ordering::SeqCst);
        if !self.dial_delay.is_zero() {
            tokio::time::sleep(self.dial_delay).await;
        }

        if !self.up.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "mock backend is down",
            ));
        }

        let booting = self
            .pending_probe_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if booting {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "mock backend still booting",
            ));
        }

        TcpStream::connect(self.target).await
    }
}
