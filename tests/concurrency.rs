#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use bytes::Bytes;
use chat_relay::protocol::message::ParsedMessage;
use chat_relay::service::registry::ClientRegistry;
use common::{expect_text, TestRelay};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt};
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn every_client_sees_every_message_intact() {
    const CLIENTS: usize = 8;
    const MESSAGES: usize = 25;

    let relay = TestRelay::start().await;
    let mut clients = Vec::new();
    for i in 0..CLIENTS {
        clients.push(relay.join(&format!("user{i}")).await);
    }

    let mut tasks = JoinSet::new();
    for mut client in clients {
        tasks.spawn(async move {
            for n in 0..MESSAGES {
                client.send_text(&format!("message {n}")).await.unwrap();
            }
            let mut per_sender: HashMap<String, Vec<usize>> = HashMap::new();
            for _ in 0..CLIENTS * MESSAGES {
                let text = expect_text(&mut client).await;
                let parsed = ParsedMessage::parse(&text).expect("relayed frames stay well-formed");
                let n: usize = parsed
                    .body
                    .strip_prefix("message ")
                    .and_then(|n| n.parse().ok())
                    .expect("body survives relay");
                per_sender.entry(parsed.sender).or_default().push(n);
            }
            per_sender
        });
    }

    while let Some(result) = tasks.join_next().await {
        let per_sender = result.unwrap();
        assert_eq!(per_sender.len(), CLIENTS);
        for sequence in per_sender.values() {
            // One sender's messages arrive in the order it sent them
            assert_eq!(*sequence, (0..MESSAGES).collect::<Vec<_>>());
        }
    }

    relay.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn churn_during_broadcast_never_panics() {
    let registry = Arc::new(ClientRegistry::new(Duration::from_millis(200)));
    let mut tasks = JoinSet::new();

    // Members that join, read a little, then vanish mid-stream
    for _ in 0..16 {
        let registry = Arc::clone(&registry);
        tasks.spawn(async move {
            for _ in 0..20 {
                let (writer, mut reader) = duplex(256);
                let handle = registry.register(writer, None).unwrap();
                let mut buf = [0u8; 32];
                let _ = tokio::time::timeout(Duration::from_millis(2), reader.read(&mut buf)).await;
                drop(reader);
                if handle.id() % 2 == 0 {
                    let _ = handle.close().await;
                }
                registry.unregister(handle.id()).unwrap();
            }
        });
    }

    // Broadcasters hammering whatever is registered
    for i in 0..4 {
        let registry = Arc::clone(&registry);
        tasks.spawn(async move {
            for n in 0..50 {
                let frame = Bytes::from(format!("b{i}: {n}<EOF>"));
                let report = registry.broadcast(frame).await.unwrap();
                let mut ids = report.delivered.clone();
                ids.extend(&report.skipped);
                let unique: std::collections::HashSet<_> = ids.iter().collect();
                assert_eq!(unique.len(), ids.len(), "no duplicate delivery");
            }
        });
    }

    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }
    assert!(registry.is_empty().unwrap());
}

#[tokio::test]
async fn broadcast_snapshot_matches_membership() {
    let registry = ClientRegistry::default();
    let mut readers = Vec::new();
    let mut handles = Vec::new();
    for _ in 0..5 {
        let (writer, reader) = duplex(1024);
        handles.push(registry.register(writer, None).unwrap());
        readers.push(reader);
    }
    registry.unregister(handles[1].id()).unwrap();
    registry.unregister(handles[3].id()).unwrap();

    let report = registry
        .broadcast(Bytes::from_static(b"x: y<EOF>"))
        .await
        .unwrap();
    assert_eq!(
        report.delivered,
        vec![handles[0].id(), handles[2].id(), handles[4].id()]
    );
    assert_eq!(report.recipients(), 3);
}
