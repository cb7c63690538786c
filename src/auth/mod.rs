//! Login and signup against the server-side credential store.
//!
//! The store itself lives behind the wire: the client sends one JSON action
//! frame and waits for one status reply. Password handling beyond pass-through
//! is out of scope here.

use std::fmt;

use tokio::io::AsyncWrite;

use crate::proto::actions::{AuthReply, WireAction};
use crate::proto::framing::{FrameError, FrameSender};
use crate::proto::transport::ChatTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Login,
    Signup,
}

#[derive(Debug)]
pub enum AuthError {
    /// The server refused the credentials; carries its message.
    Rejected(String),
    /// The reply was not a recognizable status object.
    Protocol(String),
    Frame(FrameError),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Rejected(msg) => f.write_str(msg),
            AuthError::Protocol(msg) => write!(f, "unexpected auth reply: {msg}"),
            AuthError::Frame(e) => write!(f, "auth exchange failed: {e}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<FrameError> for AuthError {
    fn from(e: FrameError) -> Self {
        AuthError::Frame(e)
    }
}

/// Perform one login or signup round trip.
pub async fn authenticate<T, W>(
    transport: &mut T,
    sender: &mut FrameSender<W>,
    mode: AuthMode,
    name: &str,
    password: &str,
) -> Result<(), AuthError>
where
    T: ChatTransport,
    W: AsyncWrite + Unpin,
{
    let action = match mode {
        AuthMode::Login => WireAction::Login {
            name: name.into(),
            password: password.into(),
        },
        AuthMode::Signup => WireAction::Signup {
            name: name.into(),
            password: password.into(),
        },
    };
    sender.send(&action.to_payload()).await?;

    let payload = transport.receive().await?;
    let reply: AuthReply = serde_json::from_slice(&payload)
        .map_err(|_| AuthError::Protocol(String::from_utf8_lossy(&payload).into_owned()))?;

    if reply.is_ok() {
        Ok(())
    } else {
        let default = match mode {
            AuthMode::Login => "Login failed",
            AuthMode::Signup => "Signup failed",
        };
        Err(AuthError::Rejected(
            reply.message.unwrap_or_else(|| default.to_string()),
        ))
    }
}
