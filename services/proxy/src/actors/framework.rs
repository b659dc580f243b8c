//! Mailbox actors and the supervisor that owns them.
//!
//! An actor handles one message at a time from an unbounded mailbox and stops
//! when its supervisor flips its shutdown watch, when it asks to stop, or when
//! every handle to its mailbox is gone.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Marker trait for actor messages.
pub trait Message: Send + Debug + 'static {}

impl<T: Send + Debug + 'static> Message for T {}

/// Single-writer state machine driven by its mailbox.
#[async_trait]
pub trait Actor: Send + 'static {
    type Message: Message;

    /// Actor name for logging.
    fn name(&self) -> &str;

    /// Handle one message. Returning `false` stops the actor.
    async fn handle(&mut self, msg: Self::Message, ctx: &ActorContext) -> bool;

    /// Runs once before the first message is handled.
    async fn on_start(&mut self, _ctx: &ActorContext) {}

    /// Runs once after the last message was handled.
    async fn on_stop(&mut self, _ctx: &ActorContext) {}
}

/// What an actor can see of its own runtime.
pub struct ActorContext {
    pub actor_id: String,
    /// Flips to `true` when the supervisor stops the actor. Tasks the actor
    /// spawns can clone it to notice the stop.
    pub shutdown: watch::Receiver<bool>,
}

/// Posting to an actor whose loop has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("actor stopped")]
pub struct ActorStopped;

/// Cloneable sender into an actor's mailbox.
///
/// Posting never blocks, so timer callbacks and `Drop` impls can use it from
/// synchronous code.
pub struct ActorHandle<M: Message> {
    tx: mpsc::UnboundedSender<M>,
    actor_id: String,
}

impl<M: Message> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            actor_id: self.actor_id.clone(),
        }
    }
}

impl<M: Message> Debug for ActorHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorHandle")
            .field("actor_id", &self.actor_id)
            .finish()
    }
}

impl<M: Message> ActorHandle<M> {
    pub fn send(&self, msg: M) -> Result<(), ActorStopped> {
        self.tx.send(msg).map_err(|_| ActorStopped)
    }
}

struct Child {
    actor_id: String,
    task: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Owns spawned actors and stops them together.
///
/// Dropping the supervisor drops every shutdown sender, which stops the
/// actors too.
#[derive(Default)]
pub struct Supervisor {
    children: Vec<Child>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn an actor. `make` receives the actor's own handle so the actor
    /// can post to itself from tasks it spawns.
    pub fn spawn<A, F>(&mut self, name: &str, make: F) -> ActorHandle<A::Message>
    where
        A: Actor,
        F: FnOnce(ActorHandle<A::Message>) -> A,
    {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        let actor_id = format!("{}_{}", name, NEXT_ID.fetch_add(1, Ordering::Relaxed));

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = ActorHandle {
            tx,
            actor_id: actor_id.clone(),
        };

        let actor = make(handle.clone());
        info!(actor_id = %actor_id, actor_type = actor.name(), "Spawned actor");

        let ctx = ActorContext {
            actor_id: actor_id.clone(),
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(run_actor_loop(actor, rx, ctx));

        self.children.push(Child {
            actor_id,
            task,
            shutdown_tx,
        });

        handle
    }

    /// Signal every actor to stop, aborting any still running after `grace`.
    pub async fn stop_all(&mut self, grace: Duration) {
        info!(count = self.children.len(), "Stopping all actors");

        for child in &self.children {
            let _ = child.shutdown_tx.send(true);
        }

        let deadline = Instant::now() + grace;
        while self.children.iter().any(|c| !c.task.is_finished()) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        for child in self.children.drain(..) {
            if !child.task.is_finished() {
                warn!(actor_id = %child.actor_id, "Actor outlived grace period, aborting");
                child.task.abort();
            }
        }
    }
}

async fn run_actor_loop<A: Actor>(
    mut actor: A,
    mut rx: mpsc::UnboundedReceiver<A::Message>,
    ctx: ActorContext,
) {
    actor.on_start(&ctx).await;

    let mut shutdown = ctx.shutdown.clone();
    let mut handled = 0u64;

    loop {
        tokio::select! {
            biased;

            // A dropped sender means the supervisor is gone.
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(actor_id = %ctx.actor_id, "Actor received shutdown signal");
                    break;
                }
            }

            msg = rx.recv() => {
                let Some(msg) = msg else {
                    debug!(actor_id = %ctx.actor_id, "Actor mailbox closed");
                    break;
                };
                handled += 1;
                if !actor.handle(msg, &ctx).await {
                    debug!(actor_id = %ctx.actor_id, "Actor requested stop");
                    break;
                }
            }
        }
    }

    actor.on_stop(&ctx).await;
    info!(actor_id = %ctx.actor_id, messages_handled = handled, "Actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[derive(Debug)]
    enum CounterMessage {
        Add(u64),
        Get(oneshot::Sender<u64>),
        Quit,
    }

    struct Counter {
        total: u64,
        stopped: Option<oneshot::Sender<u64>>,
    }

    impl Counter {
        fn new() -> Self {
            Self {
                total: 0,
                stopped: None,
            }
        }
    }

    #[async_trait]
    impl Actor for Counter {
        type Message = CounterMessage;

        fn name(&self) -> &str {
            "counter"
        }

        async fn handle(&mut self, msg: CounterMessage, _ctx: &ActorContext) -> bool {
            match msg {
                CounterMessage::Add(n) => self.total += n,
                CounterMessage::Get(reply) => {
                    let _ = reply.send(self.total);
                }
                CounterMessage::Quit => return false,
            }
            true
        }

        async fn on_stop(&mut self, _ctx: &ActorContext) {
            if let Some(tx) = self.stopped.take() {
                let _ = tx.send(self.total);
            }
        }
    }

    #[tokio::test]
    async fn test_messages_handled_in_order() {
        let mut supervisor = Supervisor::new();
        let handle = supervisor.spawn("counter", |_| Counter::new());

        for n in 1..=10 {
            handle.send(CounterMessage::Add(n)).unwrap();
        }
        let (tx, rx) = oneshot::channel();
        handle.send(CounterMessage::Get(tx)).unwrap();

        assert_eq!(rx.await.unwrap(), 55);
    }

    #[tokio::test]
    async fn test_requested_stop_runs_on_stop_and_closes_mailbox() {
        let mut supervisor = Supervisor::new();
        let (stopped_tx, stopped_rx) = oneshot::channel();
        let handle = supervisor.spawn("counter", |_| Counter {
            total: 0,
            stopped: Some(stopped_tx),
        });

        handle.send(CounterMessage::Add(7)).unwrap();
        handle.send(CounterMessage::Quit).unwrap();

        assert_eq!(stopped_rx.await.unwrap(), 7);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.send(CounterMessage::Add(1)), Err(ActorStopped));
    }

    #[tokio::test]
    async fn test_stop_all_stops_every_actor() {
        let mut supervisor = Supervisor::new();
        let a = supervisor.spawn("counter", |_| Counter::new());
        let b = supervisor.spawn("counter", |_| Counter::new());

        supervisor.stop_all(Duration::from_secs(1)).await;

        assert_eq!(a.send(CounterMessage::Add(1)), Err(ActorStopped));
        assert_eq!(b.send(CounterMessage::Add(1)), Err(ActorStopped));
    }
}
