//! Connection lifecycle control.
//!
//! One `RouteController` actor per route decides when the backend is started
//! and stopped, and hands out `Lease`s (checked-out backend connections) to
//! connection handlers.
//!
//! ## Flow
//!
//! ```text
//! Handler --acquire--> Controller --(Off)--> Operator.start + await_ready
//!    |                     |
//!    |<------ Lease -------+--(Empty/Running)--> Operator.connect
//!    |
//!    +--release (or drop)--> Controller --(last player)--> Operator.schedule_shutdown
//! ```

mod controller;
mod lease;
mod state;

pub use controller::{ControllerHandle, ControllerMessage, ControllerSnapshot, RouteController};
pub use lease::Lease;
pub use state::LifecycleState;
