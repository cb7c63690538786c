//! Client session lifecycle and local-command translation.
//!
//! The session is a four-state machine driven only by explicit, validated
//! events; everything else that looks like a transition is an error surfaced
//! to the caller, never a silent state change. Translation maps what the
//! user typed to the wire vocabulary plus any out-of-band side requests the
//! same input triggers.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Offline,
    Connected,
    LoggedIn,
    Chatting,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Offline => "offline",
            SessionState::Connected => "connected",
            SessionState::LoggedIn => "logged in",
            SessionState::Chatting => "chatting",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Connect,
    AuthenticateOk,
    PeerConnectAccepted,
    Quit,
    ConnectionLost,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionEvent::Connect => "connect",
            SessionEvent::AuthenticateOk => "authenticate-ok",
            SessionEvent::PeerConnectAccepted => "peer-connect-accepted",
            SessionEvent::Quit => "quit",
            SessionEvent::ConnectionLost => "connection-lost",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum SessionError {
    InvalidTransition {
        state: SessionState,
        event: SessionEvent,
    },
    /// Bad local command syntax. Shown to the user; nothing reaches the wire.
    Usage(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidTransition { state, event } => {
                write!(f, "event '{event}' is not valid while {state}")
            }
            SessionError::Usage(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for SessionError {}

/// What one line of user input turns into.
///
/// The fields are independent side channels: the same input may produce a
/// wire token *and* an AI side request (e.g. `@ai` inside chat text).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Translation {
    /// Plain-text protocol token to frame and send, if any.
    pub token: Option<String>,
    /// Out-of-band AI query triggered by an `@ai` mention.
    pub ai_query: Option<String>,
    /// Out-of-band image-generation request from `/aipic`.
    pub image_prompt: Option<String>,
    /// Local file to read and broadcast as an image, from `/sendimage`.
    pub image_file: Option<String>,
    /// `/clear` is a purely local effect and emits no token.
    pub clear_screen: bool,
}

#[derive(Debug)]
pub struct SessionStateMachine {
    state: SessionState,
    my_name: Option<String>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Offline,
            my_name: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Identity stored at login.
    pub fn my_name(&self) -> Option<&str> {
        self.my_name.as_deref()
    }

    pub fn set_my_name(&mut self, name: impl Into<String>) {
        self.my_name = Some(name.into());
    }

    /// Apply one lifecycle event, returning the new state.
    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionState, SessionError> {
        use SessionEvent as E;
        use SessionState as S;

        let next = match (self.state, event) {
            (S::Offline, E::Connect) => S::Connected,
            (S::Connected, E::AuthenticateOk) => S::LoggedIn,
            (S::LoggedIn, E::PeerConnectAccepted) => S::Chatting,
            (S::Chatting, E::Quit) => S::Offline,
            (_, E::ConnectionLost) => S::Offline,
            (state, event) => return Err(SessionError::InvalidTransition { state, event }),
        };
        self.state = next;
        Ok(next)
    }

    /// Map a line of user input to the wire vocabulary.
    ///
    /// Recognized slash commands missing a required argument fail with a
    /// usage error and nothing is sent; unknown slash commands fall through
    /// as chat text, matching server behavior.
    pub fn translate(&self, raw: &str) -> Result<Translation, SessionError> {
        let mut out = Translation::default();
        let input = raw.trim();
        if input.is_empty() {
            return Ok(out);
        }

        if let Some(rest) = input.strip_prefix("/connect") {
            let user = rest.trim();
            if user.is_empty() {
                return Err(SessionError::Usage("Usage: /connect <username>".into()));
            }
            out.token = Some(format!("c {user}"));
        } else if let Some(rest) = input.strip_prefix("/search") {
            let term = rest.trim();
            if term.is_empty() {
                return Err(SessionError::Usage("Usage: /search <term>".into()));
            }
            out.token = Some(format!("? {term}"));
        } else if let Some(rest) = input.strip_prefix("/poem") {
            let number = rest.trim();
            if !number.is_empty() && number.chars().all(|c| c.is_ascii_digit()) {
                out.token = Some(format!("p{number}"));
            } else {
                // Sonnet 1 when no (or a malformed) number is given.
                out.token = Some("p1".into());
            }
        } else if input.starts_with("/quit") {
            out.token = Some("q".into());
        } else if input.starts_with("/who") {
            out.token = Some("who".into());
        } else if input.starts_with("/time") {
            out.token = Some("time".into());
        } else if input.starts_with("/clear") {
            out.clear_screen = true;
            return Ok(out);
        } else if let Some(rest) = input
            .strip_prefix("/aipic:")
            .or_else(|| input.strip_prefix("/aipic"))
        {
            let prompt = rest.trim();
            if prompt.is_empty() {
                return Err(SessionError::Usage(
                    "Usage: /aipic <prompt> or /aipic: <prompt>".into(),
                ));
            }
            out.image_prompt = Some(prompt.to_string());
        } else if let Some(rest) = input.strip_prefix("/sendimage") {
            let path = rest.trim();
            if path.is_empty() {
                return Err(SessionError::Usage("Usage: /sendimage <path>".into()));
            }
            out.image_file = Some(path.to_string());
        } else {
            out.token = Some(input.to_string());
        }

        // The @ai mention is an independent side channel: it coexists with
        // whatever token the same input produced.
        let mention = input
            .as_bytes()
            .windows(3)
            .position(|w| w.eq_ignore_ascii_case(b"@ai"));
        if let Some(idx) = mention {
            let query = input[idx + 3..].trim();
            if !query.is_empty() {
                out.ai_query = Some(query.to_string());
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_in(state: SessionState) -> SessionStateMachine {
        let mut sm = SessionStateMachine::new();
        let path: &[SessionEvent] = match state {
            SessionState::Offline => &[],
            SessionState::Connected => &[SessionEvent::Connect],
            SessionState::LoggedIn => &[SessionEvent::Connect, SessionEvent::AuthenticateOk],
            SessionState::Chatting => &[
                SessionEvent::Connect,
                SessionEvent::AuthenticateOk,
                SessionEvent::PeerConnectAccepted,
            ],
        };
        for e in path {
            sm.apply(*e).unwrap();
        }
        sm
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut sm = SessionStateMachine::new();
        assert_eq!(sm.state(), SessionState::Offline);
        assert_eq!(sm.apply(SessionEvent::Connect).unwrap(), SessionState::Connected);
        assert_eq!(
            sm.apply(SessionEvent::AuthenticateOk).unwrap(),
            SessionState::LoggedIn
        );
        assert_eq!(
            sm.apply(SessionEvent::PeerConnectAccepted).unwrap(),
            SessionState::Chatting
        );
        assert_eq!(sm.apply(SessionEvent::Quit).unwrap(), SessionState::Offline);
    }

    #[test]
    fn from_offline_only_connect_is_valid() {
        for event in [
            SessionEvent::AuthenticateOk,
            SessionEvent::PeerConnectAccepted,
            SessionEvent::Quit,
        ] {
            let mut sm = SessionStateMachine::new();
            assert!(matches!(
                sm.apply(event),
                Err(SessionError::InvalidTransition { .. })
            ));
            assert_eq!(sm.state(), SessionState::Offline, "state must not change");
        }
    }

    #[test]
    fn connection_lost_is_valid_from_any_state() {
        for state in [
            SessionState::Offline,
            SessionState::Connected,
            SessionState::LoggedIn,
            SessionState::Chatting,
        ] {
            let mut sm = machine_in(state);
            assert_eq!(
                sm.apply(SessionEvent::ConnectionLost).unwrap(),
                SessionState::Offline
            );
        }
    }

    #[test]
    fn quit_is_only_valid_while_chatting() {
        let mut sm = machine_in(SessionState::LoggedIn);
        assert!(sm.apply(SessionEvent::Quit).is_err());
        let mut sm = machine_in(SessionState::Chatting);
        assert!(sm.apply(SessionEvent::Quit).is_ok());
    }

    #[test]
    fn slash_commands_map_to_wire_tokens() {
        let sm = SessionStateMachine::new();
        let cases = [
            ("/time", "time"),
            ("/who", "who"),
            ("/quit", "q"),
            ("/connect bob", "c bob"),
            ("/search rust", "? rust"),
            ("/poem 18", "p18"),
            ("/poem", "p1"),
            ("/poem x", "p1"),
        ];
        for (input, token) in cases {
            let t = sm.translate(input).unwrap();
            assert_eq!(t.token.as_deref(), Some(token), "input {input:?}");
        }
    }

    #[test]
    fn free_text_passes_through_as_token() {
        let sm = SessionStateMachine::new();
        let t = sm.translate("hello everyone").unwrap();
        assert_eq!(t.token.as_deref(), Some("hello everyone"));
        assert!(t.ai_query.is_none());
    }

    #[test]
    fn connect_without_argument_is_usage_error() {
        let sm = SessionStateMachine::new();
        assert!(matches!(
            sm.translate("/connect"),
            Err(SessionError::Usage(_))
        ));
        assert!(matches!(
            sm.translate("/search   "),
            Err(SessionError::Usage(_))
        ));
    }

    #[test]
    fn clear_is_local_only() {
        let sm = SessionStateMachine::new();
        let t = sm.translate("/clear").unwrap();
        assert!(t.clear_screen);
        assert!(t.token.is_none());
    }

    #[test]
    fn ai_mention_coexists_with_chat_body() {
        let sm = SessionStateMachine::new();
        let t = sm.translate("hey @ai what time is it").unwrap();
        assert_eq!(t.token.as_deref(), Some("hey @ai what time is it"));
        assert_eq!(t.ai_query.as_deref(), Some("what time is it"));
    }

    #[test]
    fn empty_ai_mention_triggers_nothing() {
        let sm = SessionStateMachine::new();
        let t = sm.translate("ping @ai").unwrap();
        assert!(t.ai_query.is_none());
    }

    #[test]
    fn sendimage_yields_file_side_request_only() {
        let sm = SessionStateMachine::new();
        let t = sm.translate("/sendimage /tmp/cat.png").unwrap();
        assert_eq!(t.image_file.as_deref(), Some("/tmp/cat.png"));
        assert!(t.token.is_none());
        assert!(matches!(
            sm.translate("/sendimage"),
            Err(SessionError::Usage(_))
        ));
    }

    #[test]
    fn aipic_variants_yield_image_prompt() {
        let sm = SessionStateMachine::new();
        for input in ["/aipic a red fox", "/aipic: a red fox"] {
            let t = sm.translate(input).unwrap();
            assert_eq!(t.image_prompt.as_deref(), Some("a red fox"));
            assert!(t.token.is_none());
        }
        assert!(matches!(sm.translate("/aipic"), Err(SessionError::Usage(_))));
    }
}
