//! Checked-out backend connection.

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpStream;
use tracing::debug;

use super::controller::ControllerMessage;
use crate::actors::ActorHandle;

/// A backend connection handed out by a route controller.
///
/// Counts as one player until released. Releasing consumes the lease; a lease
/// that is dropped without an explicit release is released by its `Drop`, so
/// the controller hears about every lease exactly once.
#[derive(Debug)]
pub struct Lease {
    stream: TcpStream,
    controller: ActorHandle<ControllerMessage>,
}

impl Lease {
    pub(crate) fn new(stream: TcpStream, controller: ActorHandle<ControllerMessage>) -> Self {
        Self { stream, controller }
    }

    /// The backend socket.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Return the connection to the controller and close it.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let backend = self.stream.peer_addr().ok();
        if self
            .controller
            .send(ControllerMessage::Release { backend })
            .is_err()
        {
            debug!("Controller already stopped, lease dropped");
        }
    }
}
