#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use chat_relay::config::ServerConfig;
use chat_relay::service::registry::ClientRegistry;
use chat_relay::service::server::RelayServer;
use chat_relay::RelayClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestRelay {
    pub addr: SocketAddr,
    pub registry: Arc<ClientRegistry>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<chat_relay::Result<()>>,
}

impl TestRelay {
    pub async fn start() -> Self {
        Self::start_with(ServerConfig::default()).await
    }

    pub async fn start_with(mut config: ServerConfig) -> Self {
        config.address = "127.0.0.1:0".to_string();
        config.shutdown_timeout = Duration::from_secs(2);
        let server = RelayServer::bind(config).await.expect("bind relay");
        let addr = server.local_addr().expect("local addr");
        let registry = server.registry();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(server.run_with_shutdown(shutdown_rx));
        Self {
            addr,
            registry,
            shutdown_tx,
            task,
        }
    }

    /// Connect and wait until the relay has registered the new client.
    pub async fn join(&self, name: &str) -> RelayClient {
        let before = self.registry.len().unwrap();
        let client = RelayClient::connect(self.addr, name)
            .await
            .expect("connect to relay");
        self.wait_for_clients(before + 1).await;
        client
    }

    pub async fn wait_for_clients(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        while self.registry.len().unwrap() != expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {expected} registered clients, have {}",
                self.registry.len().unwrap()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .expect("server task panicked")
            .expect("server returned error");
    }
}

pub async fn expect_text(client: &mut RelayClient) -> String {
    client
        .expect_frame(RECV_TIMEOUT)
        .await
        .expect("frame from relay")
        .text()
        .to_string()
}
