//! Text-level interpretation of a frame: `"<sender>: <body><EOF>"`.
//!
//! The sender is whatever the client wrote before the first colon. It is not
//! checked against the connection it arrived on.

use crate::core::frame::DELIMITER;
use crate::error::{constants, RelayError, Result};

/// Body that asks the relay to disconnect the sender
pub const QUIT_BODY: &str = "quit";

/// Width of the `": "` separator between sender and body
const SEPARATOR_WIDTH: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub sender: String,
    pub body: String,
    pub is_quit: bool,
}

impl ParsedMessage {
    /// Parse decoded frame text.
    ///
    /// The body starts two bytes after the first colon, whatever those two
    /// bytes are, and runs up to the first delimiter.
    pub fn parse(text: &str) -> Result<Self> {
        let delimiter = text
            .find(DELIMITER)
            .ok_or_else(|| RelayError::ParseError(constants::ERR_MISSING_DELIMITER.into()))?;
        let head = &text[..delimiter];

        let colon = head
            .find(':')
            .ok_or_else(|| RelayError::ParseError(constants::ERR_MISSING_SEPARATOR.into()))?;

        let body = head
            .get(colon + SEPARATOR_WIDTH..)
            .ok_or_else(|| RelayError::ParseError(constants::ERR_TRUNCATED_BODY.into()))?;

        Ok(Self {
            sender: head[..colon].to_string(),
            body: body.to_string(),
            is_quit: body == QUIT_BODY,
        })
    }

    /// The frame text broadcast in place of a quit request
    pub fn departure_notice(&self) -> String {
        format!("{} has left{DELIMITER}", self.sender)
    }
}

/// Build outgoing frame text for `sender`.
pub fn compose(sender: &str, body: &str) -> String {
    format!("{sender}: {body}{DELIMITER}")
}
