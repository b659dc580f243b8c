//! Actor runtime for the route controllers.
//!
//! ## Design Principles
//!
//! - **One actor per route**: each route controller owns its lifecycle state
//!   and player count exclusively
//! - **Serialized handling**: messages are handled one at a time in arrival
//!   order, so no locks guard actor state
//! - **Grouped shutdown**: a `Supervisor` stops every route controller
//!   together on exit

mod framework;

pub use framework::{Actor, ActorContext, ActorHandle, ActorStopped, Message, Supervisor};
