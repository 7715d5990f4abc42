//! # chat-relay
//!
//! A broadcast chat relay. Clients connect over TCP and send
//! `"<sender>: <body><EOF>"` frames, either as plain text or wrapped in a
//! per-message AES-256-CBC envelope. Every frame is relayed to every connected
//! client, the sender included. A body of `quit` makes the relay announce
//! `"<sender> has left<EOF>"` and drop the sender.
//!
//! ## Modules
//! - [`core`]: frame type and the incremental framing codec
//! - [`protocol`]: message parsing and the per-connection session
//! - [`service`]: client registry, acceptor and a small client
//! - [`utils`]: envelope crypto, logging, timeouts, metrics
//! - [`config`]: TOML / environment configuration
//! - [`error`]: the crate error type
//!
//! ## Example
//! ```rust,no_run
//! use chat_relay::config::ServerConfig;
//! use chat_relay::service::server::RelayServer;
//!
//! # async fn run() -> chat_relay::error::Result<()> {
//! let server = RelayServer::bind(ServerConfig::default()).await?;
//! server.run().await
//! # }
//! ```
//!
//! The envelope carries its own key in the clear. It hides text from casual
//! inspection only and must not be relied on for confidentiality.

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod utils;

pub use crate::core::codec::FrameCodec;
pub use crate::core::frame::{Frame, FrameKind, DELIMITER};
pub use crate::error::{RelayError, Result};
pub use crate::protocol::message::ParsedMessage;
pub use crate::service::client::RelayClient;
pub use crate::service::registry::{ClientHandle, ClientRegistry};
pub use crate::service::server::RelayServer;
