pub mod chat_loop;
pub mod config;
pub mod constants;
pub mod directory;
pub mod session;
