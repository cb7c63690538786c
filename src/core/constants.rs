//! Shared constants used across the application

use std::time::Duration;

/// Digits in the ASCII length prefix of every frame.
///
/// Seven digits supports payloads up to 9,999,999 bytes, which leaves room
/// for base64-encoded images on the text channel.
pub const LEN_PREFIX_WIDTH: usize = 7;

/// Largest payload representable by the length prefix.
pub const MAX_PAYLOAD_BYTES: usize = 9_999_999;

/// Default chat server address.
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 1112;

/// One event-loop tick. The loop processes at most one inbound frame and one
/// outbound message per tick.
pub const TICK_INTERVAL: Duration = Duration::from_millis(200);

/// Pause after a transient receive failure before the next tick.
pub const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// How often the client asks the server for the online-user snapshot.
pub const USER_LIST_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Bound on any single request to the AI backend. Expiry is treated as a
/// failed, non-fatal call.
pub const AI_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on downloading a generated image from the AI backend.
pub const IMAGE_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest local image file `/sendimage` will put on the wire.
pub const MAX_IMAGE_FILE_BYTES: usize = 1_500_000;

/// Command summary shown after login and after `/clear`.
pub const MENU: &str = "\
++++ Choose one of the following commands
  /time             calendar time in the system
  /who              find out who else is there
  /connect <user>   connect to the user and chat
  /search <term>    search your chat logs where <term> appears
  /poem <#>         get sonnet number <#>
  /summary          AI summary of the visible conversation
  /keywords         AI keywords for the visible conversation
  /aipic <prompt>   generate and share an AI image
  /sendimage <path> share a local image file
  /clear            clear this screen (local only)
  /quit             leave the chat system
  @ai <query>       ask the AI assistant
";
