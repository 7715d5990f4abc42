//! # Error Types
//!
//! Error handling for the chat relay.
//!
//! Every failure is local to the component that hit it: a session error closes
//! that session only, an accept error is logged and the acceptor keeps going,
//! and only a bind failure is fatal to the server.
//!
//! ## Error Categories
//! - **I/O Errors**: read/write failures on a client stream
//! - **Listener Errors**: bind and accept failures
//! - **Envelope Errors**: encryption/decryption failures
//! - **Framing Errors**: malformed or oversized frames
//! - **Timeouts**: slow recipients and idle clients
//!
//! ## Example Usage
//! ```rust
//! use chat_relay::error::{RelayError, Result};
//! use chat_relay::protocol::message::ParsedMessage;
//! use tracing::{error, info};
//!
//! fn sender_of(frame: &str) -> Result<String> {
//!     let parsed = ParsedMessage::parse(frame)?;
//!     Ok(parsed.sender)
//! }
//!
//! match sender_of("alice: hi<EOF>") {
//!     Ok(sender) => info!(%sender, "parsed frame"),
//!     Err(RelayError::ParseError(reason)) => error!(%reason, "malformed frame"),
//!     Err(e) => error!(error = %e, "unexpected failure"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Registry errors
    pub const ERR_REGISTRY_WRITE_LOCK: &str = "Failed to acquire write lock on client registry";
    pub const ERR_REGISTRY_READ_LOCK: &str = "Failed to acquire read lock on client registry";

    /// Framing errors
    pub const ERR_MISSING_DELIMITER: &str = "frame has no <EOF> delimiter";
    pub const ERR_MISSING_SEPARATOR: &str = "frame has no ':' sender separator";
    pub const ERR_TRUNCATED_BODY: &str = "frame body does not follow ': ' separator";
    pub const ERR_INVALID_TEXT: &str = "delimited frame is neither UTF-8 text nor an envelope";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_CONNECTION_TIMEOUT: &str = "Connection timed out (no activity)";
    pub const ERR_TIMEOUT: &str = "Operation timed out";

    /// Envelope errors
    pub const ERR_ENVELOPE_TOO_SHORT: &str = "Envelope shorter than key and IV";
    pub const ERR_ENVELOPE_ALIGNMENT: &str = "Ciphertext is not a whole number of blocks";
    pub const ERR_RANDOM_SOURCE: &str = "OS random source unavailable";
}

/// RelayError is the primary error type for all relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to bind listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to accept connection: {0}")]
    Accept(io::Error),

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Malformed frame: {0}")]
    ParseError(String),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Connection timed out (no activity)")]
    ConnectionTimeout,

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RelayError {
    /// True for failures that originate from the peer's bytes rather than the transport.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            RelayError::DecryptionFailure
                | RelayError::ParseError(_)
                | RelayError::OversizedFrame(_)
        )
    }
}

/// Type alias for Results using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;
