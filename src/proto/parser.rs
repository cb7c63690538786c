//! Decoding of server broadcast lines into structured chat events.
//!
//! The server formats every relayed chat message as
//! `(DD.MM.YY,HH:MM) user : content`. Lines that match the grammar become
//! [`ChatEvent::Text`] (or a notice when the sender is the server itself);
//! anything else falls through a single documented heuristic and is still
//! displayed rather than dropped.

/// One decoded protocol event, consumed exactly once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A timestamped chat message relayed by the server.
    Text {
        date: String,
        time: String,
        sender: String,
        body: String,
    },
    /// A server- or client-originated informational line, display-ready.
    Notice { body: String },
    /// An image received on the binary sub-protocol.
    Image { sender: String, data: Vec<u8> },
    /// Wholesale replacement snapshot of online users: (name, status).
    UserList { users: Vec<(String, String)> },
    /// A line the grammar and heuristics could not place. Still displayed.
    Unrecognized { raw: String },
}

/// Sender name the server uses for its own announcements.
const SERVER_SENDER: &str = "System";

/// Split a broadcast line into (date, time, sender, content) if it matches
/// the strict grammar.
fn split_stamped(raw: &str) -> Option<(&str, &str, &str, &str)> {
    let rest = raw.strip_prefix('(')?;
    // Fixed-width stamp: DD.MM.YY,HH:MM
    let (stamp, rest) = (rest.get(..14)?, rest.get(14..)?);
    let (date, time) = (stamp.get(..8)?, stamp.get(9..)?);
    if stamp.as_bytes()[8] != b',' {
        return None;
    }
    let date_ok = date
        .char_indices()
        .all(|(i, c)| if i == 2 || i == 5 { c == '.' } else { c.is_ascii_digit() });
    let time_ok = time
        .char_indices()
        .all(|(i, c)| if i == 2 { c == ':' } else { c.is_ascii_digit() });
    if !date_ok || !time_ok {
        return None;
    }
    let rest = rest.strip_prefix(") ")?;
    let sep = rest.find(" : ")?;
    Some((date, time, &rest[..sep], &rest[sep + 3..]))
}

/// Decode one line without date tracking. See [`LineParser`] for the
/// stateful variant that also emits date separators.
pub fn parse_line(raw: &str) -> ChatEvent {
    match split_stamped(raw) {
        Some((_, time, sender, body)) if sender == SERVER_SENDER => ChatEvent::Notice {
            body: format!("[{time}] [{SERVER_SENDER}] {body}"),
        },
        Some((date, time, sender, body)) => ChatEvent::Text {
            date: date.to_string(),
            time: time.to_string(),
            sender: sender.to_string(),
            body: body.to_string(),
        },
        None if raw.contains("joined") => ChatEvent::Notice {
            body: format!("[{SERVER_SENDER}] {raw}"),
        },
        None => ChatEvent::Unrecognized {
            raw: raw.to_string(),
        },
    }
}

/// Tracks the last-seen date and synthesizes one separator notice per
/// distinct date value, never repeating it for the same date.
#[derive(Debug, Default)]
pub struct DateTracker {
    last: Option<String>,
}

impl DateTracker {
    pub fn check(&mut self, date: &str) -> Option<ChatEvent> {
        if self.last.as_deref() == Some(date) {
            return None;
        }
        self.last = Some(date.to_string());
        Some(ChatEvent::Notice {
            body: format!("--------- {date} ---------"),
        })
    }
}

/// Stateful line decoder: strict grammar, heuristic fallback, and a date
/// separator synthesized before the first event of each new date.
#[derive(Debug, Default)]
pub struct LineParser {
    dates: DateTracker,
}

impl LineParser {
    /// Decode one line into the events to dispatch, in order.
    pub fn parse(&mut self, raw: &str) -> Vec<ChatEvent> {
        let mut events = Vec::with_capacity(2);
        if let Some((date, _, _, _)) = split_stamped(raw) {
            let date = date.to_string();
            if let Some(sep) = self.dates.check(&date) {
                events.push(sep);
            }
        }
        events.push(parse_line(raw));
        events
    }

    /// Date-separate a locally originated event (e.g. the local echo), using
    /// the same tracker so inbound and local dates never double-announce.
    pub fn check_date(&mut self, date: &str) -> Option<ChatEvent> {
        self.dates.check(date)
    }
}
