//! Line-oriented presentation of chat events.
//!
//! Rendering proper is deliberately thin: the engine dispatches
//! [`ChatEvent`]s and this module turns each one into at most one printable
//! line. Anything richer (widgets, colors, image display) would live behind
//! the same narrow interface.

use crate::core::constants::MENU;
use crate::proto::parser::ChatEvent;

/// Render one event as a display line. Returns `None` for events that
/// produce no visible output.
pub fn render_event(event: &ChatEvent, my_name: &str) -> Option<String> {
    match event {
        ChatEvent::Text {
            time, sender, body, ..
        } => {
            let who = if sender == my_name { "Me" } else { sender };
            Some(format!("[{time}] [{who}] {body}"))
        }
        ChatEvent::Notice { body } => Some(body.clone()),
        ChatEvent::Image { sender, data } => {
            Some(format!("[{sender} sent an image: {} bytes]", data.len()))
        }
        ChatEvent::UserList { users } => {
            if users.is_empty() {
                return None;
            }
            let names: Vec<&str> = users.iter().map(|(name, _)| name.as_str()).collect();
            Some(format!("Online now: {}", names.join(", ")))
        }
        ChatEvent::Unrecognized { raw } => Some(raw.clone()),
    }
}

/// Clear the terminal and reprint the command menu. Purely local.
pub fn clear_screen() {
    print!("\x1b[2J\x1b[1;1H");
    println!("Chat cleared!\n{MENU}");
}
