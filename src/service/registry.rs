//! # Client Registry
//!
//! The set of live client connections that broadcasts go to.
//!
//! Membership changes and snapshots are serialized behind one `RwLock`, which
//! is never held across an `.await`. A broadcast takes a snapshot, releases the
//! lock, then writes to each member in registration order. Each member's write
//! half sits behind its own async mutex so concurrent broadcasts never
//! interleave bytes on one stream.

use crate::core::codec::FrameCodec;
use crate::error::{constants, RelayError, Result};
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::{with_timeout_error, DEFAULT_TIMEOUT};
use bytes::Bytes;
use futures::SinkExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Registry-assigned connection number. Never sent on the wire.
pub type ConnectionId = u64;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct HandleInner {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    writer: Mutex<FramedWrite<BoxedWriter, FrameCodec>>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

/// Shared handle to one client's write side.
#[derive(Clone)]
pub struct ClientHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ClientHandle {
    fn new<W>(id: ConnectionId, peer: Option<SocketAddr>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: BoxedWriter = Box::new(writer);
        Self {
            inner: Arc::new(HandleInner {
                id,
                peer,
                writer: Mutex::new(FramedWrite::new(writer, FrameCodec::default())),
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Token the owning session watches; cancelling it ends the session.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Ask the owning session to stop at its next read.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    /// Write one frame and flush it.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(RelayError::ConnectionClosed);
        }
        let mut writer = self.inner.writer.lock().await;
        // close() may have run while we waited for the writer
        if self.is_closed() {
            return Err(RelayError::ConnectionClosed);
        }
        writer.send(frame).await
    }

    /// Flush and shut down the write half. Later sends fail with `ConnectionClosed`.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = self.inner.writer.lock().await;
        writer.close().await
    }
}

/// Outcome of one broadcast
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients the frame was written to, in delivery order
    pub delivered: Vec<ConnectionId>,
    /// Recipients whose send failed or timed out
    pub skipped: Vec<ConnectionId>,
}

impl BroadcastReport {
    pub fn recipients(&self) -> usize {
        self.delivered.len() + self.skipped.len()
    }
}

/// Live client connections, in registration order.
pub struct ClientRegistry {
    clients: RwLock<Vec<ClientHandle>>,
    next_id: AtomicU64,
    send_timeout: Duration,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ClientRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            clients: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            send_timeout,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Add a client's write half and return its handle.
    pub fn register<W>(&self, writer: W, peer: Option<SocketAddr>) -> Result<ClientHandle>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = ClientHandle::new(id, peer, writer);

        let mut clients = self
            .clients
            .write()
            .map_err(|_| RelayError::LockPoisoned(constants::ERR_REGISTRY_WRITE_LOCK))?;
        clients.push(handle.clone());
        debug!(connection_id = id, ?peer, total = clients.len(), "client registered");
        Ok(handle)
    }

    /// Remove a client. Returns `None` if it was already gone.
    pub fn unregister(&self, id: ConnectionId) -> Result<Option<ClientHandle>> {
        let mut clients = self
            .clients
            .write()
            .map_err(|_| RelayError::LockPoisoned(constants::ERR_REGISTRY_WRITE_LOCK))?;
        let removed = clients
            .iter()
            .position(|handle| handle.id() == id)
            .map(|index| clients.remove(index));
        if removed.is_some() {
            debug!(connection_id = id, total = clients.len(), "client unregistered");
        }
        Ok(removed)
    }

    /// Handles registered at this instant, in registration order.
    pub fn snapshot(&self) -> Result<Vec<ClientHandle>> {
        let clients = self
            .clients
            .read()
            .map_err(|_| RelayError::LockPoisoned(constants::ERR_REGISTRY_READ_LOCK))?;
        Ok(clients.clone())
    }

    pub fn ids(&self) -> Result<Vec<ConnectionId>> {
        Ok(self.snapshot()?.iter().map(ClientHandle::id).collect())
    }

    pub fn contains(&self, id: ConnectionId) -> Result<bool> {
        let clients = self
            .clients
            .read()
            .map_err(|_| RelayError::LockPoisoned(constants::ERR_REGISTRY_READ_LOCK))?;
        Ok(clients.iter().any(|handle| handle.id() == id))
    }

    pub fn len(&self) -> Result<usize> {
        let clients = self
            .clients
            .read()
            .map_err(|_| RelayError::LockPoisoned(constants::ERR_REGISTRY_READ_LOCK))?;
        Ok(clients.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Cancel every registered session.
    pub fn cancel_all(&self) -> Result<usize> {
        let clients = self.snapshot()?;
        for handle in &clients {
            handle.cancel();
        }
        Ok(clients.len())
    }

    /// Send `frame` to every client registered when the call starts.
    ///
    /// A recipient whose send fails or times out is skipped and its session is
    /// cancelled, since its stream may now hold a partial frame. The rest still
    /// get the frame.
    #[instrument(skip(self, frame), fields(len = frame.len()))]
    pub async fn broadcast(&self, frame: Bytes) -> Result<BroadcastReport> {
        let recipients = self.snapshot()?;
        let metrics = global_metrics();
        metrics.broadcast_started();

        let mut report = BroadcastReport::default();
        for handle in recipients {
            match with_timeout_error(handle.send(frame.clone()), self.send_timeout).await {
                Ok(()) => {
                    metrics.delivery(frame.len() as u64);
                    report.delivered.push(handle.id());
                }
                Err(RelayError::Timeout) => {
                    warn!(connection_id = handle.id(), peer = ?handle.peer(), "send timed out; dropping recipient");
                    metrics.delivery_skipped();
                    handle.cancel();
                    report.skipped.push(handle.id());
                }
                Err(e) => {
                    debug!(connection_id = handle.id(), error = %e, "send failed; dropping recipient");
                    metrics.delivery_skipped();
                    handle.cancel();
                    report.skipped.push(handle.id());
                }
            }
        }

        debug!(
            delivered = report.delivered.len(),
            skipped = report.skipped.len(),
            "broadcast complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    fn register_pipe(registry: &ClientRegistry) -> (ClientHandle, DuplexStream) {
        let (writer, reader) = duplex(4096);
        let handle = registry.register(writer, None).unwrap();
        (handle, reader)
    }

    async fn read_exact_str(reader: &mut DuplexStream, len: usize) -> String {
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn ids_are_unique_and_ordered() {
        let registry = ClientRegistry::default();
        let (a, _ra) = register_pipe(&registry);
        let (b, _rb) = register_pipe(&registry);
        let (c, _rc) = register_pipe(&registry);
        assert!(a.id() < b.id() && b.id() < c.id());
        assert_eq!(registry.ids().unwrap(), vec![a.id(), b.id(), c.id()]);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = ClientRegistry::default();
        let (a, _ra) = register_pipe(&registry);
        assert!(registry.unregister(a.id()).unwrap().is_some());
        assert!(registry.unregister(a.id()).unwrap().is_none());
        assert!(registry.is_empty().unwrap());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member() {
        let registry = ClientRegistry::default();
        let (_a, mut ra) = register_pipe(&registry);
        let (_b, mut rb) = register_pipe(&registry);

        let frame = Bytes::from_static(b"alice: hi<EOF>");
        let report = registry.broadcast(frame.clone()).await.unwrap();
        assert_eq!(report.delivered.len(), 2);
        assert!(report.skipped.is_empty());

        assert_eq!(read_exact_str(&mut ra, frame.len()).await, "alice: hi<EOF>");
        assert_eq!(read_exact_str(&mut rb, frame.len()).await, "alice: hi<EOF>");
    }

    #[tokio::test]
    async fn removed_member_is_not_targeted() {
        let registry = ClientRegistry::default();
        let (a, _ra) = register_pipe(&registry);
        let (b, _rb) = register_pipe(&registry);
        registry.unregister(a.id()).unwrap();

        let report = registry
            .broadcast(Bytes::from_static(b"x: y<EOF>"))
            .await
            .unwrap();
        assert_eq!(report.delivered, vec![b.id()]);
    }

    #[tokio::test]
    async fn failed_recipient_is_skipped() {
        let registry = ClientRegistry::default();
        let (a, ra) = register_pipe(&registry);
        let (b, mut rb) = register_pipe(&registry);
        drop(ra);

        let report = registry
            .broadcast(Bytes::from_static(b"x: y<EOF>"))
            .await
            .unwrap();
        assert_eq!(report.skipped, vec![a.id()]);
        assert_eq!(report.delivered, vec![b.id()]);
        assert!(a.cancellation().is_cancelled());
        assert!(!b.cancellation().is_cancelled());
        assert_eq!(read_exact_str(&mut rb, 9).await, "x: y<EOF>");
    }

    #[tokio::test]
    async fn closed_handle_is_skipped() {
        let registry = ClientRegistry::default();
        let (a, _ra) = register_pipe(&registry);
        a.close().await.unwrap();
        assert!(a.is_closed());

        let report = registry
            .broadcast(Bytes::from_static(b"x: y<EOF>"))
            .await
            .unwrap();
        assert_eq!(report.skipped, vec![a.id()]);
    }

    #[tokio::test]
    async fn slow_recipient_times_out_and_is_cancelled() {
        let registry = ClientRegistry::new(Duration::from_millis(50));
        // Tiny pipe nobody reads from: the write blocks once it fills
        let (writer, _reader) = duplex(8);
        let slow = registry.register(writer, None).unwrap();
        let (fast, mut rf) = register_pipe(&registry);

        let frame = Bytes::from(vec![b'z'; 64]);
        let report = registry.broadcast(frame).await.unwrap();
        assert_eq!(report.skipped, vec![slow.id()]);
        assert_eq!(report.delivered, vec![fast.id()]);
        assert!(slow.cancellation().is_cancelled());
        assert_eq!(read_exact_str(&mut rf, 64).await.len(), 64);
    }

    #[tokio::test]
    async fn cancel_all_trips_every_token() {
        let registry = ClientRegistry::default();
        let (a, _ra) = register_pipe(&registry);
        let (b, _rb) = register_pipe(&registry);
        assert_eq!(registry.cancel_all().unwrap(), 2);
        assert!(a.cancellation().is_cancelled());
        assert!(b.cancellation().is_cancelled());
    }
}
