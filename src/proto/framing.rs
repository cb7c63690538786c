//! Length-prefixed frame codec for the chat wire protocol.
//!
//! Every message on the wire is one frame: a fixed-width, left-zero-padded
//! ASCII decimal byte count followed by exactly that many payload bytes.
//! The codec is generic over tokio's I/O traits so the same code runs over a
//! real TCP stream and over in-memory pipes in tests.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::constants::{LEN_PREFIX_WIDTH, MAX_PAYLOAD_BYTES};

/// Errors surfaced by the frame codec.
///
/// `Oversize` and `BadLengthPrefix` are fatal to a single frame, not to the
/// session; `Disconnected` and `ConnectionBroken` mean the peer is gone.
#[derive(Debug)]
pub enum FrameError {
    /// Payload length does not fit in the fixed-width prefix.
    Oversize { len: usize },
    /// The length prefix was not a decimal number.
    BadLengthPrefix,
    /// Peer closed the connection before a complete length prefix arrived.
    Disconnected,
    /// A write returned zero bytes.
    ConnectionBroken,
    Io(std::io::Error),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Oversize { len } => write!(
                f,
                "payload of {len} bytes exceeds the {MAX_PAYLOAD_BYTES}-byte frame limit"
            ),
            FrameError::BadLengthPrefix => write!(f, "frame length prefix is not a decimal number"),
            FrameError::Disconnected => write!(f, "peer disconnected"),
            FrameError::ConnectionBroken => write!(f, "socket connection broken"),
            FrameError::Io(e) => write!(f, "frame I/O error: {e}"),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        FrameError::Io(e)
    }
}

impl FrameError {
    /// True when the error means the peer is gone and the session should
    /// drop to offline.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, FrameError::Disconnected | FrameError::ConnectionBroken)
    }
}

/// Encode a payload into a complete frame.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(FrameError::Oversize { len: payload.len() });
    }
    let mut frame = Vec::with_capacity(LEN_PREFIX_WIDTH + payload.len());
    frame.extend_from_slice(format!("{:0width$}", payload.len(), width = LEN_PREFIX_WIDTH).as_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Writing side of the frame channel.
///
/// Shared between the event loop and worker tasks behind a mutex so two
/// frames never interleave on the wire.
pub struct FrameSender<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encode and write one frame, looping on partial writes until every
    /// byte is out. A zero-byte write is reported as a broken connection
    /// rather than silently dropping the rest of the frame.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let frame = encode_frame(payload)?;
        let mut written = 0;
        while written < frame.len() {
            let n = self.inner.write(&frame[written..]).await?;
            if n == 0 {
                return Err(FrameError::ConnectionBroken);
            }
            written += n;
        }
        self.inner.flush().await?;
        Ok(())
    }
}

/// Reading side of the frame channel.
pub struct FrameReceiver<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Read one frame: exactly the prefix, then exactly the declared payload,
    /// accumulating across short reads.
    ///
    /// If the peer closes before a full prefix arrives this is
    /// `FrameError::Disconnected`. If the peer closes mid-payload the bytes
    /// accumulated so far are returned; callers must tolerate truncated
    /// payloads downstream.
    pub async fn receive(&mut self) -> Result<Vec<u8>, FrameError> {
        let mut prefix = [0u8; LEN_PREFIX_WIDTH];
        let mut filled = 0;
        while filled < LEN_PREFIX_WIDTH {
            let n = self.inner.read(&mut prefix[filled..]).await?;
            if n == 0 {
                return Err(FrameError::Disconnected);
            }
            filled += n;
        }

        let declared: usize = std::str::from_utf8(&prefix)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(FrameError::BadLengthPrefix)?;

        let mut payload = vec![0u8; declared];
        let mut filled = 0;
        while filled < declared {
            let n = self.inner.read(&mut payload[filled..]).await?;
            if n == 0 {
                payload.truncate(filled);
                break;
            }
            filled += n;
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn encode_prefixes_payload_length() {
        let frame = encode_frame(b"hello").unwrap();
        assert_eq!(&frame[..LEN_PREFIX_WIDTH], b"0000005");
        assert_eq!(&frame[LEN_PREFIX_WIDTH..], b"hello");
    }

    #[test]
    fn encode_rejects_oversize_payload() {
        let payload = vec![0u8; MAX_PAYLOAD_BYTES + 1];
        match encode_frame(&payload) {
            Err(FrameError::Oversize { len }) => assert_eq!(len, MAX_PAYLOAD_BYTES + 1),
            other => panic!("expected oversize error, got {other:?}"),
        }
    }

    #[test]
    fn encode_accepts_empty_payload() {
        assert_eq!(encode_frame(b"").unwrap(), b"0000000");
    }

    #[tokio::test]
    async fn frame_round_trip() {
        let (client, server) = duplex(64);
        let mut tx = FrameSender::new(client);
        let mut rx = FrameReceiver::new(server);

        tx.send(b"who").await.unwrap();
        assert_eq!(rx.receive().await.unwrap(), b"who");
    }

    #[tokio::test]
    async fn receiver_accumulates_across_split_writes() {
        let (mut client, server) = duplex(64);
        let mut rx = FrameReceiver::new(server);

        // Deliver the frame in three fragments, splitting the prefix too.
        use tokio::io::AsyncWriteExt;
        client.write_all(b"000").await.unwrap();
        client.write_all(b"0012hello ").await.unwrap();
        client.write_all(b"world!").await.unwrap();

        assert_eq!(rx.receive().await.unwrap(), b"hello world!");
    }

    #[tokio::test]
    async fn close_before_full_prefix_is_disconnect() {
        let (mut client, server) = duplex(64);
        let mut rx = FrameReceiver::new(server);

        use tokio::io::AsyncWriteExt;
        client.write_all(b"0000").await.unwrap();
        drop(client);

        match rx.receive().await {
            Err(FrameError::Disconnected) => {}
            other => panic!("expected disconnect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_mid_payload_yields_truncated_payload() {
        let (mut client, server) = duplex(64);
        let mut rx = FrameReceiver::new(server);

        use tokio::io::AsyncWriteExt;
        client.write_all(b"0000010abc").await.unwrap();
        drop(client);

        assert_eq!(rx.receive().await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn garbage_prefix_is_rejected() {
        let (mut client, server) = duplex(64);
        let mut rx = FrameReceiver::new(server);

        use tokio::io::AsyncWriteExt;
        client.write_all(b"abcdefgpayload").await.unwrap();

        match rx.receive().await {
            Err(FrameError::BadLengthPrefix) => {}
            other => panic!("expected bad prefix, got {other:?}"),
        }
    }
}
