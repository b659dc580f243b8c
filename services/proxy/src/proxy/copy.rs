//! Duplex byte copy between a client and its backend.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::warn;

const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Bytes moved in each direction by [`proxy_bidirectional`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyTotals {
    pub client_to_backend: u64,
    pub backend_to_client: u64,
}

/// Proxy data bidirectionally until both directions have finished.
///
/// Each direction ends at EOF or on error. On EOF the write half of the other
/// socket is shut down so the peer sees the half-close; on error it is shut
/// down as well, so the opposite direction cannot hang on a dead session.
/// Errors are logged at warn level and never returned.
pub async fn proxy_bidirectional(client: &mut TcpStream, backend: &mut TcpStream) -> CopyTotals {
    let (mut client_read, mut client_write) = client.split();
    let (mut backend_read, mut backend_write) = backend.split();

    let upstream = copy_half(&mut client_read, &mut backend_write);
    let downstream = copy_half(&mut backend_read, &mut client_write);

    let (up, down) = tokio::join!(upstream, downstream);

    CopyTotals {
        client_to_backend: settle("client->backend", up),
        backend_to_client: settle("backend->client", down),
    }
}

/// Copy one direction, returning bytes moved alongside any error.
async fn copy_half<R, W>(reader: &mut R, writer: &mut W) -> (u64, io::Result<()>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    let result = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => {
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    break Err(e);
                }
                total += n as u64;
            }
            Err(e) => break Err(e),
        }
    };

    // Propagate the close; the peer may already be gone.
    let _ = writer.shutdown().await;

    (total, result)
}

fn settle(direction: &'static str, (bytes, result): (u64, io::Result<()>)) -> u64 {
    if let Err(e) = result {
        warn!(direction, bytes, error = %e, "Copy direction ended with error");
    }
    bytes
}
