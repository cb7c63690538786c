//! Structured JSON actions carried over the frame channel.
//!
//! Auth, image, user-list and AI traffic share the text channel with plain
//! chat lines; each is a JSON object tagged by its `action` field. Only the
//! `image` and `list` actions are consumed inside the event loop — every
//! other inbound payload is handed to the line parser untouched.

use memchr::memchr;
use serde::{Deserialize, Serialize};

/// Wire actions, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WireAction {
    Login {
        name: String,
        password: String,
    },
    Signup {
        name: String,
        password: String,
    },
    /// Sent bare as a request; the server's reply carries `results`.
    List {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        results: Option<String>,
    },
    Image {
        from: String,
        data: String,
    },
    AiQuery {
        query: String,
    },
    AiImage {
        prompt: String,
    },
    Exchange {
        from: String,
        message: String,
    },
}

impl WireAction {
    pub fn to_payload(&self) -> Vec<u8> {
        // Serialization of these enums cannot fail; fall back to an empty
        // object rather than propagating an impossible error.
        serde_json::to_vec(self).unwrap_or_else(|_| b"{}".to_vec())
    }
}

/// Reply to a `login`/`signup` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthReply {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthReply {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Classification of one decoded inbound frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Base64 image broadcast, handled inside the event loop.
    Image { sender: String, data: String },
    /// Online-user snapshot reply, handled inside the event loop.
    UserList { results: String },
    /// Everything else: a server-formatted line for the protocol parser.
    Line(String),
}

/// Classify a frame payload. Payloads that fail to parse as a known action
/// (including truncated or non-UTF-8 ones) degrade to a displayable line.
pub fn classify_inbound(payload: &[u8]) -> InboundFrame {
    if let Ok(action) = serde_json::from_slice::<WireAction>(payload) {
        match action {
            WireAction::Image { from, data } => return InboundFrame::Image { sender: from, data },
            WireAction::List {
                results: Some(results),
            } => return InboundFrame::UserList { results },
            _ => {}
        }
    }
    InboundFrame::Line(String::from_utf8_lossy(payload).into_owned())
}

/// Extract the online-user mapping embedded in a `list` reply.
///
/// The `results` field is not strict JSON: the mapping is a brace-delimited
/// span inside a larger string, with single- or double-quoted names and
/// statuses. The first `{...}` span is located and parsed permissively,
/// preserving the order in which entries appear.
pub fn extract_user_list(results: &str) -> Vec<(String, String)> {
    let bytes = results.as_bytes();
    let Some(start) = memchr(b'{', bytes) else {
        return Vec::new();
    };
    let Some(end) = memchr(b'}', &bytes[start..]).map(|i| start + i) else {
        return Vec::new();
    };

    let mut users = Vec::new();
    for pair in results[start + 1..end].split(',') {
        let mut halves = pair.splitn(2, ':');
        let name = unquote(halves.next().unwrap_or(""));
        let status = unquote(halves.next().unwrap_or(""));
        if !name.is_empty() {
            users.push((name.to_string(), status.to_string()));
        }
    }
    users
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches(|c| c == '\'' || c == '"')
}
