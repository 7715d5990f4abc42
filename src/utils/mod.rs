//! # Utility Modules
//!
//! Supporting utilities for the envelope cipher, logging, timing and metrics.
//!
//! ## Components
//! - **Crypto**: AES-256-CBC envelope with a fresh key per message
//! - **Logging**: `tracing-subscriber` setup
//! - **Timeout**: async deadline wrappers
//! - **Metrics**: thread-safe observability counters

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod timeout;
