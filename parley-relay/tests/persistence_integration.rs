//! Persistence integration tests.
//!
//! Verifies:
//! - Messages sent through the full server stack land in RocksDB
//! - History survives a store restart
//! - Conversations stay isolated from each other

use std::sync::Arc;

use parley_relay::client::RelayClient;
use parley_relay::delivery::DeliveryEngine;
use parley_relay::handler::SenderPolicy;
use parley_relay::identity::Identity;
use parley_relay::protocol::ServerEvent;
use parley_relay::registry::RoomRegistry;
use parley_relay::server::{RelayServer, ServerConfig};
use parley_relay::store::{MessageStore, RocksStore, StoreConfig};
use tempfile::tempdir;
use tokio::net::TcpListener;
use tokio::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn id(s: &str) -> Identity {
    Identity::parse(s).unwrap()
}

fn open_engine(path: &std::path::Path) -> DeliveryEngine {
    let store = RocksStore::open(StoreConfig::for_testing(path)).unwrap();
    DeliveryEngine::new(Arc::new(store), Arc::new(RoomRegistry::new()))
}

#[tokio::test]
async fn test_history_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let sent = {
        let engine = open_engine(&path);
        let mut sent = Vec::new();
        for i in 0..5 {
            sent.push(
                engine
                    .send(id("alice"), id("bob"), format!("before restart {i}"))
                    .await
                    .unwrap(),
            );
        }
        sent
    };

    let engine = open_engine(&path);
    engine
        .send(id("bob"), id("alice"), "after restart".into())
        .await
        .unwrap();

    let history = engine.history(id("bob"), id("alice")).await.unwrap();
    assert_eq!(history.len(), 6);
    assert_eq!(&history[..5], &sent[..]);
    assert_eq!(history[5].content, "after restart");
    assert_eq!(engine.store().count().unwrap(), 6);
}

#[tokio::test]
async fn test_conversations_isolated() {
    let dir = tempdir().unwrap();
    let engine = open_engine(&dir.path().join("db"));

    engine.send(id("alice"), id("bob"), "ab".into()).await.unwrap();
    engine.send(id("alice"), id("carol"), "ac".into()).await.unwrap();
    engine.send(id("carol"), id("bob"), "cb".into()).await.unwrap();

    for (a, b, expected) in [("alice", "bob", "ab"), ("carol", "alice", "ac"), ("bob", "carol", "cb")] {
        let history = engine.history(id(a), id(b)).await.unwrap();
        assert_eq!(history.len(), 1, "{a} ↔ {b}");
        assert_eq!(history[0].content, expected);
    }
}

#[tokio::test]
async fn test_server_with_rocks_store() {
    let dir = tempdir().unwrap();
    let store = Arc::new(RocksStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        sender_policy: SenderPolicy::Enforce,
        ..ServerConfig::default()
    };
    let server = RelayServer::new(config, store.clone());
    let running = server.clone();
    tokio::spawn(async move {
        running.serve(listener).await.unwrap();
    });

    let url = format!("ws://127.0.0.1:{port}");
    let mut bob = RelayClient::connect(&url).await.unwrap();
    bob.join("bob").await.unwrap();
    assert!(matches!(bob.next_event(WAIT).await.unwrap(), ServerEvent::Joined { .. }));

    let content = "multi-line\ncontent with ☃ and \"quotes\"";
    bob.send_message("bob", "alice", content).await.unwrap();
    assert!(matches!(bob.next_event(WAIT).await.unwrap(), ServerEvent::MessageSent { .. }));

    let stored = store.query(&id("alice"), &id("bob")).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content.as_bytes(), content.as_bytes());
}
