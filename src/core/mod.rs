//! # Core Framing Components
//!
//! Turns raw client byte streams into discrete frames and back.
//!
//! ## Components
//! - **Frame**: one complete message plus its wire bytes and kind
//! - **Codec**: Tokio codec that accumulates bytes until a frame is complete
//!
//! ## Wire Format
//! ```text
//! plaintext:  "<sender>: <body><EOF>"
//! encrypted:  [Key(32)] [IV(16)] [AES-256-CBC("<sender>: <body><EOF>")]
//! ```
//!
//! Neither form is length-prefixed. Unterminated input is capped by the
//! configured maximum frame size.

pub mod codec;
pub mod frame;
