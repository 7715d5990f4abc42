use crate::core::codec::FrameCodec;
use crate::core::frame::Frame;
use crate::error::{RelayError, Result};
use crate::protocol::message::{compose, QUIT_BODY};
use crate::utils::crypto;
use crate::utils::timeout::with_timeout_error;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::{debug, instrument};

/// Minimal relay client speaking the `"<name>: <body><EOF>"` protocol.
pub struct RelayClient {
    name: String,
    framed: Framed<TcpStream, FrameCodec>,
}

impl RelayClient {
    #[instrument(skip(addr, name))]
    pub async fn connect<A: ToSocketAddrs>(addr: A, name: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let name = name.into();
        debug!(%name, peer = ?stream.peer_addr().ok(), "connected to relay");
        Ok(Self {
            name,
            framed: Framed::new(stream, FrameCodec::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send_text(&mut self, body: &str) -> Result<()> {
        let text = compose(&self.name, body);
        self.send_raw(Bytes::from(text.into_bytes())).await
    }

    /// Send `body` inside a freshly keyed envelope.
    pub async fn send_encrypted(&mut self, body: &str) -> Result<()> {
        let envelope = crypto::encode(&compose(&self.name, body))?;
        self.send_raw(Bytes::from(envelope)).await
    }

    /// Write bytes exactly as given, without adding a sender or delimiter.
    pub async fn send_raw(&mut self, bytes: Bytes) -> Result<()> {
        self.framed.send(bytes).await
    }

    pub async fn quit(&mut self, encrypted: bool) -> Result<()> {
        if encrypted {
            self.send_encrypted(QUIT_BODY).await
        } else {
            self.send_text(QUIT_BODY).await
        }
    }

    /// Next frame from the relay; `None` once the relay closes the connection.
    pub async fn recv(&mut self) -> Result<Option<Frame>> {
        self.framed.next().await.transpose()
    }

    pub async fn recv_timeout(&mut self, limit: Duration) -> Result<Option<Frame>> {
        with_timeout_error(self.recv(), limit).await
    }

    /// Like [`recv_timeout`](Self::recv_timeout) but treats a closed connection as an error.
    pub async fn expect_frame(&mut self, limit: Duration) -> Result<Frame> {
        self.recv_timeout(limit)
            .await?
            .ok_or(RelayError::ConnectionClosed)
    }
}
