//! L4 TCP proxy path.
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> Controller.acquire -> Lease (backend socket)
//!                            |
//!                    duplex copy until both directions end
//!                            |
//!                    Controller.release
//! ```
//!
//! The byte stream is relayed unmodified; nothing here understands the
//! protocol spoken over it.

mod copy;
mod listener;

pub use copy::{proxy_bidirectional, CopyTotals};
pub use listener::{
    Listener, ListenerConfig, ListenerStats, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_MAX_CONNECTIONS,
};
