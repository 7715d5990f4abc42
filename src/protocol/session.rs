//! Per-connection relay loop.
//!
//! A session reads frames from one client, relays them through the registry,
//! and tears the connection down when the client quits, misbehaves, goes idle,
//! disconnects, or is cancelled.
//!
//! ```text
//! Reading -> Parsed -> Broadcasting -> Reading
//!                |           |
//!                +-----------+--> Closing -> Closed
//! ```

use crate::config::ServerConfig;
use crate::core::codec::FrameCodec;
use crate::core::frame::Frame;
use crate::error::{RelayError, Result};
use crate::protocol::message::ParsedMessage;
use crate::service::registry::{ClientHandle, ClientRegistry, ConnectionId};
use crate::utils::crypto;
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::maybe_with_idle_timeout;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, instrument, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Reading,
    Parsed,
    Broadcasting,
    Closing,
    Closed,
}

/// Why a session ended
#[derive(Debug)]
pub enum SessionExit {
    /// Client sent a quit body; the departure notice was broadcast
    Quit { sender: String },
    /// Client closed its end of the stream
    PeerClosed,
    /// The session's cancellation token fired
    Cancelled,
    /// Read, parse, envelope or broadcast failure
    Failed(RelayError),
}

enum Step {
    Continue,
    Quit(String),
}

pub struct ClientSession<R> {
    handle: ClientHandle,
    registry: Arc<ClientRegistry>,
    frames: FramedRead<R, FrameCodec>,
    idle_timeout: Option<Duration>,
    state: SessionState,
}

impl<R> ClientSession<R>
where
    R: AsyncRead + Unpin,
{
    /// `handle` must already be registered in `registry`.
    pub fn new(
        reader: R,
        handle: ClientHandle,
        registry: Arc<ClientRegistry>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            handle,
            registry,
            frames: FramedRead::new(reader, FrameCodec::new(config.max_frame_size)),
            idle_timeout: config.idle_timeout,
            state: SessionState::Reading,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        trace!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Relay frames until the session ends, then unregister and close.
    #[instrument(skip(self), fields(connection_id = self.handle.id(), peer = ?self.handle.peer()))]
    pub async fn run(&mut self) -> SessionExit {
        let cancel = self.handle.cancellation();

        let exit = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break SessionExit::Cancelled,
                next = maybe_with_idle_timeout(next_frame(&mut self.frames), self.idle_timeout) => next,
            };

            match next {
                Ok(Some(frame)) => match self.handle_frame(frame).await {
                    Ok(Step::Continue) => self.transition(SessionState::Reading),
                    Ok(Step::Quit(sender)) => break SessionExit::Quit { sender },
                    Err(e) => break SessionExit::Failed(e),
                },
                Ok(None) => break SessionExit::PeerClosed,
                Err(e) => break SessionExit::Failed(e),
            }
        };

        self.close(&exit).await;
        exit
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<Step> {
        let metrics = global_metrics();
        metrics.frame_received(frame.raw().len() as u64, frame.is_encrypted());
        info!(text = %frame.text(), encrypted = frame.is_encrypted(), "Text received");
        self.transition(SessionState::Parsed);

        let message = ParsedMessage::parse(frame.text())?;
        self.transition(SessionState::Broadcasting);

        if message.is_quit {
            let notice = message.departure_notice();
            let outgoing = if frame.is_encrypted() {
                Bytes::from(crypto::encode(&notice).inspect_err(|_| metrics.crypto_error())?)
            } else {
                Bytes::from(notice.into_bytes())
            };
            self.registry.broadcast(outgoing).await?;
            return Ok(Step::Quit(message.sender));
        }

        let report = self.registry.broadcast(frame.into_raw()).await?;
        debug!(
            sender = %message.sender,
            delivered = report.delivered.len(),
            skipped = report.skipped.len(),
            "relayed"
        );
        Ok(Step::Continue)
    }

    async fn close(&mut self, exit: &SessionExit) {
        self.transition(SessionState::Closing);
        let metrics = global_metrics();

        match exit {
            SessionExit::Quit { sender } => info!(%sender, "client quit"),
            SessionExit::PeerClosed => info!("client disconnected"),
            SessionExit::Cancelled => info!("session cancelled"),
            SessionExit::Failed(e) if e.is_protocol_violation() => {
                metrics.parse_error();
                warn!(error = %e, "dropping client after protocol violation");
            }
            SessionExit::Failed(e) => {
                metrics.connection_error();
                warn!(error = %e, "session failed");
            }
        }

        match self.registry.unregister(self.handle.id()) {
            Ok(Some(_)) => metrics.connection_closed(),
            Ok(None) => debug!("already unregistered"),
            Err(e) => warn!(error = %e, "failed to unregister client"),
        }

        if let Err(e) = self.handle.close().await {
            debug!(error = %e, "error while closing client stream");
        }

        self.transition(SessionState::Closed);
    }
}

async fn next_frame<R>(frames: &mut FramedRead<R, FrameCodec>) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    frames.next().await.transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    struct Harness {
        registry: Arc<ClientRegistry>,
        config: ServerConfig,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: Arc::new(ClientRegistry::default()),
                config: ServerConfig::default(),
            }
        }

        /// Returns the session plus the client's (outbound, inbound) ends.
        fn connect(&self) -> (ClientSession<DuplexStream>, DuplexStream, DuplexStream) {
            let (client_out, server_in) = duplex(4096);
            let (server_out, client_in) = duplex(4096);
            let handle = self.registry.register(server_out, None).unwrap();
            let session =
                ClientSession::new(server_in, handle, Arc::clone(&self.registry), &self.config);
            (session, client_out, client_in)
        }
    }

    impl Harness {
        /// A registered recipient with no session, returning its handle and read end.
        fn register_listener(&self) -> (ClientHandle, DuplexStream) {
            let (server_out, client_in) = duplex(4096);
            let handle = self.registry.register(server_out, None).unwrap();
            (handle, client_in)
        }
    }

    async fn read_n(stream: &mut DuplexStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn quit_broadcasts_notice_and_closes() {
        let harness = Harness::new();
        let (mut session, mut out, mut inbound) = harness.connect();
        let id = session.id();

        out.write_all(b"alice: quit<EOF>").await.unwrap();
        let exit = session.run().await;

        assert!(matches!(exit, SessionExit::Quit { ref sender } if sender == "alice"));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!harness.registry.contains(id).unwrap());

        let notice = read_n(&mut inbound, "alice has left<EOF>".len()).await;
        assert_eq!(notice, b"alice has left<EOF>");
        // Write half was shut down after the notice
        let mut rest = Vec::new();
        inbound.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn relays_then_exits_on_peer_close() {
        let harness = Harness::new();
        let (mut session, mut out, mut inbound) = harness.connect();

        out.write_all(b"bob: one<EOF>bob: two<EOF>").await.unwrap();
        drop(out);
        let exit = session.run().await;

        assert!(matches!(exit, SessionExit::PeerClosed));
        assert_eq!(read_n(&mut inbound, 26).await, b"bob: one<EOF>bob: two<EOF>");
        assert!(harness.registry.is_empty().unwrap());
    }

    #[tokio::test]
    async fn malformed_frame_fails_session() {
        let harness = Harness::new();
        let (mut session, mut out, _inbound) = harness.connect();

        out.write_all(b"no-colon-here<EOF>").await.unwrap();
        let exit = session.run().await;

        assert!(matches!(exit, SessionExit::Failed(RelayError::ParseError(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(harness.registry.is_empty().unwrap());
    }

    #[tokio::test]
    async fn non_utf8_frame_fails_session() {
        let harness = Harness::new();
        let (mut session, mut out, _inbound) = harness.connect();
        let (_other, mut other_in) = harness.register_listener();

        let parse_errors = global_metrics().snapshot().parse_errors;

        out.write_all(b"a: caf\xe9<EOF>").await.unwrap();
        out.write_all(b"a: hello<EOF>").await.unwrap();
        let exit = tokio::time::timeout(Duration::from_millis(500), session.run())
            .await
            .expect("session ends on undecodable frame");

        assert!(matches!(exit, SessionExit::Failed(RelayError::ParseError(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!harness.registry.contains(session.id()).unwrap());
        assert!(global_metrics().snapshot().parse_errors > parse_errors);

        // Nothing from the offender reached anyone else
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_millis(50), other_in.read(&mut buf)).await;
        assert!(read.is_err());
    }

    #[tokio::test]
    async fn encrypted_quit_is_reencrypted() {
        let harness = Harness::new();
        let (mut session, mut out, mut inbound) = harness.connect();

        let envelope = crypto::encode("carol: quit<EOF>").unwrap();
        out.write_all(&envelope).await.unwrap();
        let exit = session.run().await;
        assert!(matches!(exit, SessionExit::Quit { .. }));

        let mut notice = Vec::new();
        inbound.read_to_end(&mut notice).await.unwrap();
        assert_ne!(notice[..crypto::KEY_LEN], envelope[..crypto::KEY_LEN]);
        assert_eq!(crypto::decode(&notice).unwrap(), "carol has left<EOF>");
    }

    #[tokio::test]
    async fn encrypted_message_is_relayed_verbatim() {
        let harness = Harness::new();
        let (mut session, mut out, mut inbound) = harness.connect();

        let envelope = crypto::encode("dave: psst<EOF>").unwrap();
        out.write_all(&envelope).await.unwrap();
        drop(out);
        session.run().await;

        assert_eq!(read_n(&mut inbound, envelope.len()).await, envelope);
    }

    #[tokio::test]
    async fn cancellation_stops_idle_session() {
        let harness = Harness::new();
        let (mut session, _out, _inbound) = harness.connect();
        let token = harness.registry.snapshot().unwrap()[0].cancellation();

        let task = tokio::spawn(async move {
            let exit = session.run().await;
            (exit, session.state())
        });
        token.cancel();

        let (exit, state) = task.await.unwrap();
        assert!(matches!(exit, SessionExit::Cancelled));
        assert_eq!(state, SessionState::Closed);
        assert!(harness.registry.is_empty().unwrap());
    }

    #[tokio::test]
    async fn idle_timeout_closes_session() {
        let mut harness = Harness::new();
        harness.config.idle_timeout = Some(Duration::from_millis(50));
        let (mut session, _out, _inbound) = harness.connect();

        let exit = session.run().await;
        assert!(matches!(
            exit,
            SessionExit::Failed(RelayError::ConnectionTimeout)
        ));
        assert!(harness.registry.is_empty().unwrap());
    }
}
