//! Wire protocol: frame codec, JSON actions, broadcast-line grammar, and the
//! transport seam the event loop polls.

pub mod actions;
pub mod framing;
pub mod parser;
pub mod transport;
