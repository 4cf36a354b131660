//! NATS binding integration tests
//!
//! These tests require a running NATS server:
//!   nats-server
//!
//! Tests are skipped automatically if NATS is not available.

use a3s_backbone::{
    BackboneConfig, Dispatcher, MemoryDataStore, MemorySessionAuthority, NatsBinding, NatsConfig,
    ObjectNode, Operation, Payload, Reply, Session,
};
use std::sync::Arc;
use std::time::Duration;

fn bus_config(prefix: &str) -> NatsConfig {
    NatsConfig {
        url: "nats://127.0.0.1:4222".to_string(),
        queue_group: format!("test-{}", prefix),
        subject_prefix: Some(format!("test.{}", prefix)),
        connect_timeout_secs: 2,
        ..Default::default()
    }
}

/// Try to connect twice (server and client side). Returns None if NATS is unavailable.
async fn try_bindings(config: NatsConfig) -> Option<(Arc<NatsBinding>, NatsBinding)> {
    let server = NatsBinding::connect(config.clone()).await;
    let client = NatsBinding::connect(config).await;
    match (server, client) {
        (Ok(server), Ok(client)) => Some((Arc::new(server), client)),
        _ => {
            eprintln!("NATS not available, skipping integration test");
            None
        }
    }
}

/// Start serving a seeded dispatcher, or skip the test
macro_rules! nats_pair {
    ($prefix:expr) => {
        nats_pair!($prefix, bus_config($prefix))
    };
    ($prefix:expr, $config:expr) => {
        match try_bindings($config).await {
            Some((server, client)) => {
                let dispatcher = Arc::new(dispatcher());
                let serving = server.clone();
                tokio::spawn(async move { serving.serve(dispatcher).await });
                tokio::time::sleep(Duration::from_millis(200)).await;
                client
            }
            None => return,
        }
    };
}

fn dispatcher() -> Dispatcher {
    let sessions = MemorySessionAuthority::new();
    sessions.insert("T1", Session::new("uuid-1", "User")).unwrap();
    let store = MemoryDataStore::new();
    store.insert(ObjectNode::new("Image", 42).with_value("name", "cells.tiff"));
    Dispatcher::from_config(
        &BackboneConfig::new("/data/repo"),
        Arc::new(sessions),
        Arc::new(store),
    )
    .unwrap()
}

#[tokio::test]
async fn test_nats_get_object() {
    let client = nats_pair!("get_object");

    let payload = Payload::new()
        .with("sessionKey", "T1")
        .with("type", "Image")
        .with("id", 42);
    let reply = client.request(Operation::GetObject, &payload).await.unwrap();
    let json = reply.json().unwrap();
    assert_eq!(json["nodes"][0]["id"], 42);
}

#[tokio::test]
async fn test_nats_failure_carries_code() {
    let client = nats_pair!("failure");

    let payload = Payload::new().with("sessionKey", "T2");
    let reply = client.request(Operation::GetObject, &payload).await.unwrap();
    assert_eq!(
        reply,
        Reply::Failure(a3s_backbone::Failure {
            code: 403,
            message: "Session invalid".to_string()
        })
    );
}

#[tokio::test]
async fn test_nats_session_check() {
    let client = nats_pair!("session_check");

    let valid = client
        .request(Operation::IsSessionValid, &Payload::new().with("sessionKey", "T1"))
        .await
        .unwrap();
    let invalid = client
        .request(Operation::IsSessionValid, &Payload::new().with("sessionKey", "nope"))
        .await
        .unwrap();
    assert_eq!(valid.json(), Some(serde_json::Value::Bool(true)));
    assert_eq!(invalid.json(), Some(serde_json::Value::Bool(false)));
}

#[tokio::test]
async fn test_nats_single_in_flight_answers_all() {
    let config = NatsConfig {
        max_in_flight: 1,
        ..bus_config("in_flight")
    };
    let client = Arc::new(nats_pair!("in_flight", config));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            let payload = Payload::new()
                .with("sessionKey", "T1")
                .with("type", "Image")
                .with("id", 42);
            client.request(Operation::CanRead, &payload).await
        }));
    }
    for handle in handles {
        let reply = handle.await.unwrap().unwrap();
        assert_eq!(reply.json(), Some(serde_json::Value::Bool(true)));
    }
}
