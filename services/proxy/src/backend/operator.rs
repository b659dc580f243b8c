//! Backend operator: probing, readiness polling and idle shutdown timing.

use std::io;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::timer::ShutdownTimer;
use super::Backend;

/// Default readiness polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default timeout for a single probe or dial.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Timing knobs for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorSettings {
    /// Delay between the last release and the automatic stop.
    pub idle_timeout: Duration,
    /// Maximum time to wait for the backend to accept connections after start.
    pub startup_timeout: Duration,
    /// Readiness polling cadence.
    pub poll_interval: Duration,
    /// Timeout for each probe or dial attempt.
    pub probe_timeout: Duration,
}

impl OperatorSettings {
    pub fn new(idle_timeout: Duration, startup_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            startup_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// Why readiness polling gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadinessError {
    #[error("backend not reachable within {0:?}")]
    Timeout(Duration),

    #[error("readiness polling cancelled")]
    Cancelled,
}

/// Drives one backend's lifecycle mechanics.
///
/// Owns the idle shutdown timer; at most one timer is armed per operator.
pub struct BackendOperator<B: Backend> {
    route: String,
    backend: B,
    settings: OperatorSettings,
    timer: ShutdownTimer,
}

impl<B: Backend> BackendOperator<B> {
    pub fn new(route: impl Into<String>, backend: B, settings: OperatorSettings) -> Self {
        Self {
            route: route.into(),
            backend,
            settings,
            timer: ShutdownTimer::new(),
        }
    }

    /// Connect-and-close probe.
    pub async fn is_reachable(&self) -> bool {
        match self.connect().await {
            Ok(_) => true,
            Err(e) => {
                debug!(route = %self.route, error = %e, "Backend not reachable");
                false
            }
        }
    }

    /// Issue the start command. Failures are returned, not retried.
    pub async fn start(&self) -> Result<()> {
        info!(
            route = %self.route,
            backend = %self.backend.endpoint(),
            "Backend is not running, starting it"
        );
        self.backend.start().await
    }

    /// Poll reachability until it succeeds, `startup_timeout` elapses, or
    /// `cancel` flips to true.
    ///
    /// The first probe happens one `poll_interval` after the call. Returns the
    /// number of probes made.
    pub async fn await_ready(
        &self,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<u32, ReadinessError> {
        let deadline = tokio::time::sleep(self.settings.startup_timeout);
        tokio::pin!(deadline);

        let mut ticker = interval_at(
            Instant::now() + self.settings.poll_interval,
            self.settings.poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            route = %self.route,
            backend = %self.backend.endpoint(),
            startup_timeout_ms = self.settings.startup_timeout.as_millis() as u64,
            "Waiting for backend to start"
        );

        let mut attempt = 0u32;
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(
                        route = %self.route,
                        attempts = attempt,
                        "Backend did not come up in time"
                    );
                    return Err(ReadinessError::Timeout(self.settings.startup_timeout));
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return Err(ReadinessError::Cancelled);
                    }
                }
                _ = ticker.tick() => {
                    attempt += 1;
                    debug!(route = %self.route, attempt, "Probing backend");
                    match self.connect().await {
                        Ok(_) => {
                            info!(route = %self.route, attempt, "Backend is up");
                            return Ok(attempt);
                        }
                        Err(e) => {
                            warn!(route = %self.route, attempt, error = %e, "Probe failed");
                        }
                    }
                }
            }
        }
    }

    /// A single dial attempt bounded by `probe_timeout`.
    pub async fn connect(&self) -> io::Result<TcpStream> {
        match timeout(self.settings.probe_timeout, self.backend.dial()).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout")),
        }
    }

    /// Arm the idle shutdown timer, replacing any pending one.
    pub fn schedule_shutdown<F>(&self, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        info!(
            route = %self.route,
            idle_timeout_ms = self.settings.idle_timeout.as_millis() as u64,
            "No players left, scheduling backend shutdown"
        );
        self.timer.schedule(self.settings.idle_timeout, on_fire);
    }

    /// Cancel a pending shutdown; no-op if none is armed.
    pub fn cancel_shutdown(&self) {
        if self.timer.cancel() {
            debug!(route = %self.route, "Cancelled scheduled shutdown");
        }
    }

    pub fn shutdown_armed(&self) -> bool {
        self.timer.is_armed()
    }

    /// Issue the stop command. Best effort: failures are logged only.
    pub async fn stop(&self) {
        info!(route = %self.route, backend = %self.backend.endpoint(), "Stopping idle backend");
        if let Err(e) = self.backend.stop().await {
            error!(route = %self.route, error = %e, "Failed to stop backend");
        }
    }
}
