//! Transport seam between the event loop and the socket.
//!
//! The loop never blocks waiting for the peer: each tick it asks the
//! transport whether a read would succeed right now, and only then pulls one
//! frame. The trait exists so loop tests can run against an in-memory
//! transport with scripted frames.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::proto::framing::{FrameError, FrameReceiver, FrameSender};

/// Inbound half of a chat connection.
#[async_trait]
pub trait ChatTransport: Send {
    /// Zero-timeout readiness probe: reports whether data is waiting without
    /// ever blocking the caller.
    async fn poll_ready(&self) -> bool;

    /// Receive one frame. Only called after `poll_ready` reported data, so
    /// in practice this does not stall the loop beyond one frame's arrival.
    async fn receive(&mut self) -> Result<Vec<u8>, FrameError>;
}

/// TCP-backed transport over the read half of a split stream.
pub struct TcpChatTransport {
    receiver: FrameReceiver<OwnedReadHalf>,
}

#[async_trait]
impl ChatTransport for TcpChatTransport {
    async fn poll_ready(&self) -> bool {
        // timeout(ZERO, ..) polls the readiness future exactly once before
        // giving up, which is the non-blocking probe we want.
        matches!(
            timeout(Duration::ZERO, self.receiver.get_ref().readable()).await,
            Ok(Ok(()))
        )
    }

    async fn receive(&mut self) -> Result<Vec<u8>, FrameError> {
        self.receiver.receive().await
    }
}

/// Open the chat connection and split it into the loop-owned reader and the
/// shared, serialized writer.
pub async fn connect(
    host: &str,
    port: u16,
) -> std::io::Result<(TcpChatTransport, FrameSender<OwnedWriteHalf>)> {
    let stream = TcpStream::connect((host, port)).await?;
    let (read, write) = stream.into_split();
    Ok((
        TcpChatTransport {
            receiver: FrameReceiver::new(read),
        },
        FrameSender::new(write),
    ))
}
