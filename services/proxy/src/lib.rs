//! idlegate proxy
//!
//! TCP reverse proxy for game servers that are expensive to keep running.
//!
//! For every configured route the proxy:
//! - Listens for client connections
//! - Starts the backend through the control plane on the first connection
//!   and waits until it accepts connections
//! - Relays bytes between client and backend unmodified
//! - Stops the backend once it has been idle for the configured delay
//!
//! See [`lifecycle`] for the state machine driving start and stop.

pub mod actors;
pub mod backend;
pub mod config;
pub mod control;
pub mod error;
pub mod lifecycle;
pub mod proxy;
pub mod route;

pub use backend::{Backend, BackendOperator, MockBackend, OperatorSettings, TcpBackend};
pub use config::Config;
pub use control::{ControlPlane, CraftyServer};
pub use error::AcquireError;
pub use lifecycle::{ControllerHandle, ControllerSnapshot, Lease, LifecycleState};
pub use route::{launch_route, RouteHandle, RouteSettings};
