use crate::config::ServerConfig;
use crate::error::{RelayError, Result};
use crate::protocol::session::{ClientSession, SessionExit};
use crate::service::registry::ClientRegistry;
use crate::utils::metrics::global_metrics;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) doesn't spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How often shutdown checks whether all sessions have ended
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Accepts client connections and runs one session task per client.
pub struct RelayServer {
    listener: TcpListener,
    registry: Arc<ClientRegistry>,
    config: ServerConfig,
}

impl RelayServer {
    /// Bind and listen on `config.address` with `config.backlog`.
    ///
    /// Any failure here is fatal and reported as `RelayError::Bind`.
    #[instrument(skip(config), fields(address = %config.address))]
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr: SocketAddr = config.address.parse().map_err(|e| {
            RelayError::ConfigError(format!("Invalid server address '{}': {e}", config.address))
        })?;
        let bind_error = |source: io::Error| RelayError::Bind {
            address: config.address.clone(),
            source,
        };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        let listener = socket.listen(config.backlog).map_err(bind_error)?;

        info!(address = %listener.local_addr()?, backlog = config.backlog, "Listening");

        Ok(Self {
            listener,
            registry: Arc::new(ClientRegistry::new(config.send_timeout)),
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });

        self.run_with_shutdown(shutdown_rx).await
    }

    /// Accept loop with an external shutdown channel.
    ///
    /// A message on `shutdown_rx`, or every sender being dropped, stops the
    /// loop. Sessions are then cancelled and given `shutdown_timeout` to finish.
    #[instrument(skip(self, shutdown_rx), fields(address = ?self.listener.local_addr().ok()))]
    pub async fn run_with_shutdown(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let RelayServer {
            listener,
            registry,
            config,
        } = self;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => admit(stream, peer, &registry, &config),
                        Err(e) => {
                            let err = RelayError::Accept(e);
                            error!(error = %err, "Error accepting connection");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }

        drop(listener);
        drain(&registry, config.shutdown_timeout).await;
        global_metrics().log_metrics();
        Ok(())
    }
}

fn admit(stream: TcpStream, peer: SocketAddr, registry: &Arc<ClientRegistry>, config: &ServerConfig) {
    let metrics = global_metrics();

    match registry.len() {
        Ok(active) if active >= config.max_connections => {
            warn!(peer = %peer, active, limit = config.max_connections, "Connection limit reached, rejecting");
            metrics.connection_rejected();
            return;
        }
        Ok(_) => {}
        Err(e) => {
            error!(peer = %peer, error = %e, "Registry unavailable, rejecting connection");
            return;
        }
    }

    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let (reader, writer) = stream.into_split();
    let handle = match registry.register(writer, Some(peer)) {
        Ok(handle) => handle,
        Err(e) => {
            error!(peer = %peer, error = %e, "Failed to register connection");
            return;
        }
    };
    metrics.connection_established();
    info!(peer = %peer, connection_id = handle.id(), "New connection established");

    let mut session = ClientSession::new(reader, handle, Arc::clone(registry), config);
    tokio::spawn(async move {
        match session.run().await {
            SessionExit::Failed(e) => warn!(peer = %peer, error = %e, "Connection closed with error"),
            exit => info!(peer = %peer, ?exit, "Connection closed"),
        }
    });
}

async fn drain(registry: &ClientRegistry, limit: Duration) {
    match registry.cancel_all() {
        Ok(0) => return,
        Ok(count) => info!(connections = count, "Shutting down server. Waiting for connections to close..."),
        Err(e) => {
            error!(error = %e, "Failed to cancel sessions");
            return;
        }
    }

    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!("Shutdown timeout reached, forcing exit");
                break;
            }
            _ = tokio::time::sleep(DRAIN_POLL_INTERVAL) => {
                if registry.is_empty().unwrap_or(true) {
                    info!("All connections closed, shutting down");
                    break;
                }
            }
        }
    }
}

/// Bind to `config.address` and serve until Ctrl-C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    RelayServer::bind(config).await?.run().await
}

/// Bind to `config.address` and serve until `shutdown_rx` fires.
pub async fn start_server_with_shutdown(
    config: ServerConfig,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    RelayServer::bind(config)
        .await?
        .run_with_shutdown(shutdown_rx)
        .await
}
