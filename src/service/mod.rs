//! # Relay Service
//!
//! The server side of the relay plus a small client.
//!
//! ## Components
//! - **Registry**: the shared set of connected clients and the broadcast fan-out
//! - **Server**: binds the listener and spawns a session per accepted client
//! - **Client**: connects, sends plaintext or encrypted messages, reads frames

pub mod client;
pub mod registry;
pub mod server;
