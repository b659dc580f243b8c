//! Route controller - owns one route's lifecycle state and player count.
//!
//! All mutation happens inside a single actor. Connection handlers talk to it
//! through `ControllerHandle`; the idle timer and the startup task talk to it
//! by posting messages into the same mailbox. A new connection racing the
//! last disconnect is therefore just two ordered messages.
//!
//! Slow work (the start command, readiness polling, the stop command) runs on
//! spawned tasks that report back with a message, so the loop keeps serving
//! releases and snapshots while a backend boots. Acquirers arriving while the
//! backend is starting are parked and served when the startup result comes in.

use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::lease::Lease;
use super::state::LifecycleState;
use crate::actors::{Actor, ActorContext, ActorHandle, Supervisor};
use crate::backend::{Backend, BackendOperator, ReadinessError};
use crate::error::AcquireError;

type AcquireReply = oneshot::Sender<Result<Lease, AcquireError>>;

// =============================================================================
// Messages
// =============================================================================

/// Messages handled by the route controller.
#[derive(Debug)]
pub enum ControllerMessage {
    /// A handler wants a backend connection.
    Acquire { reply: AcquireReply },

    /// A lease was released (explicitly or by drop).
    Release { backend: Option<SocketAddr> },

    /// The idle shutdown timer armed with `generation` fired.
    IdleTimerFired { generation: u64 },

    /// The start command and readiness polling finished.
    StartupFinished { result: Result<(), AcquireError> },

    /// Report current state.
    Snapshot { reply: oneshot::Sender<ControllerSnapshot> },
}

/// Point-in-time view of a route controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSnapshot {
    pub state: LifecycleState,
    pub players: usize,
    /// Acquirers parked behind an in-flight startup.
    pub waiting: usize,
    pub idle_timer_armed: bool,
}

// =============================================================================
// Handle
// =============================================================================

/// Cheap, cloneable handle to a route controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    route: Arc<str>,
    mailbox: ActorHandle<ControllerMessage>,
}

impl ControllerHandle {
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Request a backend connection, waiting at most `deadline`.
    ///
    /// Giving up does not roll anything back: a startup this call triggered
    /// keeps going, and a connection produced after the deadline is released
    /// by the controller.
    pub async fn acquire(&self, deadline: Duration) -> Result<Lease, AcquireError> {
        let (reply, rx) = oneshot::channel();
        self.mailbox
            .send(ControllerMessage::Acquire { reply })
            .map_err(|_| AcquireError::ControllerStopped)?;

        match timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AcquireError::ControllerStopped),
            Err(_) => Err(AcquireError::Cancelled(deadline)),
        }
    }

    /// Return a connection obtained from [`ControllerHandle::acquire`].
    pub fn release(&self, lease: Lease) {
        lease.release();
    }

    /// Current state, or `None` if the controller has stopped.
    pub async fn snapshot(&self) -> Option<ControllerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.mailbox
            .send(ControllerMessage::Snapshot { reply })
            .ok()?;
        rx.await.ok()
    }
}

// =============================================================================
// Controller Actor
// =============================================================================

/// Actor owning one route's `LifecycleState` and player count.
pub struct RouteController<B: Backend> {
    route: Arc<str>,
    operator: Arc<BackendOperator<B>>,
    autoshutdown: bool,
    myself: ActorHandle<ControllerMessage>,

    state: LifecycleState,
    players: usize,
    /// Acquirers waiting for the in-flight startup.
    waiters: Vec<AcquireReply>,
    /// Generation of the most recently armed idle timer.
    timer_generation: u64,
    /// Stop command still in flight; the next start waits for it.
    pending_stop: Option<JoinHandle<()>>,
}

impl<B: Backend> RouteController<B> {
    /// Spawn the controller loop for `route` under `supervisor`.
    pub fn start_loop(
        supervisor: &mut Supervisor,
        route: &str,
        operator: BackendOperator<B>,
        autoshutdown: bool,
    ) -> ControllerHandle {
        let route: Arc<str> = Arc::from(route);
        let operator = Arc::new(operator);

        let mailbox = supervisor.spawn(&route, |myself| RouteController {
            route: Arc::clone(&route),
            operator,
            autoshutdown,
            myself,
            state: LifecycleState::Off,
            players: 0,
            waiters: Vec::new(),
            timer_generation: 0,
            pending_stop: None,
        });

        ControllerHandle { route, mailbox }
    }

    fn transition(&mut self, to: LifecycleState) {
        if self.state != to {
            info!(
                route = %self.route,
                from = %self.state,
                to = %to,
                players = self.players,
                "Lifecycle transition"
            );
            self.state = to;
        }
    }

    // -------------------------------------------------------------------------
    // Message Handlers
    // -------------------------------------------------------------------------

    async fn handle_acquire(&mut self, reply: AcquireReply, ctx: &ActorContext) {
        match self.state {
            LifecycleState::Off => {
                self.waiters.push(reply);
                self.begin_startup(ctx);
            }
            LifecycleState::StartingUp => {
                debug!(
                    route = %self.route,
                    waiting = self.waiters.len() + 1,
                    "Backend starting, queueing acquirer"
                );
                self.waiters.push(reply);
            }
            LifecycleState::Empty | LifecycleState::Running => {
                self.hand_out(reply).await;
            }
        }
    }

    fn handle_release(&mut self, backend: Option<SocketAddr>) {
        if self.players == 0 {
            warn!(route = %self.route, "Release without a recorded player, ignoring");
            return;
        }

        self.players -= 1;
        debug!(
            route = %self.route,
            backend = ?backend,
            players = self.players,
            "Connection released"
        );

        if self.players == 0 && self.state == LifecycleState::Running {
            self.transition(LifecycleState::Empty);
            self.arm_idle_timer();
        }
    }

    fn handle_idle_timer(&mut self, generation: u64) {
        if generation != self.timer_generation
            || self.state != LifecycleState::Empty
            || self.players != 0
        {
            debug!(
                route = %self.route,
                generation,
                current_generation = self.timer_generation,
                state = %self.state,
                "Ignoring stale idle timer"
            );
            return;
        }

        // The timer task may not have exited yet; drop it now.
        self.operator.cancel_shutdown();
        self.transition(LifecycleState::Off);

        let operator = Arc::clone(&self.operator);
        self.pending_stop = Some(tokio::spawn(async move {
            operator.stop().await;
        }));
    }

    async fn handle_startup_finished(&mut self, result: Result<(), AcquireError>) {
        if self.state != LifecycleState::StartingUp {
            warn!(route = %self.route, state = %self.state, "Startup result outside StartingUp");
            return;
        }

        if let Err(e) = result {
            error!(
                route = %self.route,
                reason = e.reason_code(),
                error = %e,
                waiting = self.waiters.len(),
                "Backend startup failed"
            );
            self.transition(LifecycleState::Off);
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(Err(e.clone()));
            }
            return;
        }

        // Sessions that survived a dial failure keep the route Running.
        if self.players > 0 {
            self.transition(LifecycleState::Running);
        } else {
            self.transition(LifecycleState::Empty);
        }

        for waiter in mem::take(&mut self.waiters) {
            if waiter.is_closed() {
                debug!(route = %self.route, "Acquirer gave up during startup, skipping");
                continue;
            }
            if self.state == LifecycleState::Off {
                let _ = waiter.send(Err(AcquireError::DialFailure(
                    "backend became unreachable right after startup".to_string(),
                )));
                continue;
            }
            self.hand_out(waiter).await;
        }

        // Nobody stayed for the backend we just started.
        if self.state == LifecycleState::Empty {
            self.arm_idle_timer();
        }
    }

    fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            state: self.state,
            players: self.players,
            waiting: self.waiters.len(),
            idle_timer_armed: self.operator.shutdown_armed(),
        }
    }

    // -------------------------------------------------------------------------
    // Internal Operations
    // -------------------------------------------------------------------------

    /// Dial the (ready) backend for one acquirer.
    async fn hand_out(&mut self, reply: AcquireReply) {
        if reply.is_closed() {
            return;
        }

        if self.state == LifecycleState::Empty {
            self.operator.cancel_shutdown();
            self.transition(LifecycleState::Running);
        }

        match self.operator.connect().await {
            Ok(stream) => {
                self.players += 1;
                debug!(route = %self.route, players = self.players, "Connection acquired");

                let lease = Lease::new(stream, self.myself.clone());
                if let Err(Ok(orphan)) = reply.send(Ok(lease)) {
                    // Dropping the lease posts its release back to us.
                    warn!(
                        route = %self.route,
                        "Acquirer left before delivery, releasing connection"
                    );
                    drop(orphan);
                }
            }
            Err(e) => {
                warn!(route = %self.route, error = %e, "Backend dial failed");
                self.transition(LifecycleState::Off);
                let _ = reply.send(Err(AcquireError::DialFailure(e.to_string())));
            }
        }
    }

    /// Start the backend on a separate task; the result comes back as
    /// `StartupFinished`.
    fn begin_startup(&mut self, ctx: &ActorContext) {
        self.transition(LifecycleState::StartingUp);

        let operator = Arc::clone(&self.operator);
        let myself = self.myself.clone();
        let cancel = ctx.shutdown.clone();
        let previous_stop = self.pending_stop.take();

        tokio::spawn(async move {
            if let Some(stop) = previous_stop {
                let _ = stop.await;
            }

            let result = match operator.start().await {
                Err(e) => Err(AcquireError::StartFailure(format!("{:#}", e))),
                Ok(()) => match operator.await_ready(cancel).await {
                    Ok(_) => Ok(()),
                    Err(ReadinessError::Timeout(window)) => Err(AcquireError::PollTimeout(window)),
                    Err(ReadinessError::Cancelled) => Err(AcquireError::ControllerStopped),
                },
            };

            let _ = myself.send(ControllerMessage::StartupFinished { result });
        });
    }

    fn arm_idle_timer(&mut self) {
        if !self.autoshutdown {
            debug!(route = %self.route, "Autoshutdown disabled, backend stays up");
            return;
        }

        self.timer_generation += 1;
        let generation = self.timer_generation;
        let myself = self.myself.clone();
        self.operator.schedule_shutdown(move || {
            let _ = myself.send(ControllerMessage::IdleTimerFired { generation });
        });
    }
}

#[async_trait]
impl<B: Backend> Actor for RouteController<B> {
    type Message = ControllerMessage;

    fn name(&self) -> &str {
        "route_controller"
    }

    async fn on_start(&mut self, _ctx: &ActorContext) {
        if self.operator.is_reachable().await {
            info!(route = %self.route, "Backend already running at startup");
            self.transition(LifecycleState::Empty);
            self.arm_idle_timer();
        } else {
            info!(route = %self.route, "Backend is off at startup");
        }
    }

    async fn handle(&mut self, msg: ControllerMessage, ctx: &ActorContext) -> bool {
        match msg {
            ControllerMessage::Acquire { reply } => self.handle_acquire(reply, ctx).await,
            ControllerMessage::Release { backend } => self.handle_release(backend),
            ControllerMessage::IdleTimerFired { generation } => self.handle_idle_timer(generation),
            ControllerMessage::StartupFinished { result } => {
                self.handle_startup_finished(result).await
            }
            ControllerMessage::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
        true
    }

    async fn on_stop(&mut self, _ctx: &ActorContext) {
        self.operator.cancel_shutdown();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(AcquireError::ControllerStopped));
        }
    }
}
