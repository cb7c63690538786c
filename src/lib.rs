//! Causerie is a terminal chat-system client.
//!
//! The crate is organized into:
//! - `proto`: wire framing, line grammar, JSON actions and the transport seam
//! - `core`: session state machine, tick-based event loop, peer directory,
//!   configuration and protocol constants
//! - `auth`: login and signup round trips
//! - `api`: OpenAI-compatible client for summaries, keywords, sentiment and
//!   image generation
//! - `ui`: event rendering for a line-based terminal
//! - `cli`: argument parsing and runtime bootstrap
//! - `logging`: best-effort session transcripts

pub mod api;
pub mod auth;
pub mod cli;
pub mod core;
pub mod logging;
pub mod proto;
pub mod ui;
