//! # Relay Protocol
//!
//! Message interpretation and the per-connection session loop.
//!
//! - **Message**: `"<sender>: <body><EOF>"` parsing and quit detection
//! - **Session**: reads frames from one client and drives broadcasts

pub mod message;
pub mod session;
