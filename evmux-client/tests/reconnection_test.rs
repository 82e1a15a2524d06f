//! Client reconnection integration tests
//!
//! Forced disconnects, resubscription under unchanged virtual ids, and
//! terminal failure once the strategy gives up.

mod common;

use common::{connect, eventually, test_builder, Collected, MockEthServer};
use evmux_client::{ClientBuilder, ConnectionState, EventType, FixedDelay, PhysicalId, SubscriptionStatus};
use evmux_core::Error;
use serde_json::json;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_new_heads_survives_reconnect() {
    let server = MockEthServer::start().await;
    server.queue_physical_ids(&["0xAAA", "0xBBB"]);
    let client = connect(&server).await;
    let collected = Collected::new();

    let sub = client
        .subscribe(EventType::NewHeads, None, collected.handler())
        .await
        .unwrap();
    let virtual_id = sub.id();
    let first = tokio::time::timeout(TIMEOUT, sub.confirmed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, PhysicalId::from("0xAAA"));

    server.push("0xAAA", json!({"number": "0x1"}));
    assert!(eventually(|| collected.len() == 1).await);

    server.drop_connections();

    let rebound = PhysicalId::from("0xBBB");
    assert!(eventually(|| sub.physical_id().as_ref() == Some(&rebound)).await);
    assert_eq!(sub.id(), virtual_id);
    assert_eq!(server.accepted_connections(), 2);
    assert!(eventually(|| client.is_connected()).await);

    // The stale id no longer routes; the fresh one does
    server.push("0xAAA", json!({"number": "0xdead"}));
    server.push("0xBBB", json!({"number": "0x2"}));
    assert!(eventually(|| collected.len() == 2).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        collected.values(),
        vec![json!({"number": "0x1"}), json!({"number": "0x2"})]
    );

    let subscribes = server.received("eth_subscribe");
    assert_eq!(subscribes.len(), 2);
    assert_eq!(subscribes[1]["params"], json!(["newHeads"]));
    // Request ids keep counting across connections
    assert_ne!(subscribes[0]["id"], subscribes[1]["id"]);
}

#[tokio::test]
async fn test_every_subscription_is_reissued() {
    let server = MockEthServer::start().await;
    let client = connect(&server).await;
    let filter = json!({"address": "0x0000000000000000000000000000000000000001"});

    let heads = client
        .subscribe(EventType::NewHeads, None, |_| async {})
        .await
        .unwrap();
    let logs = client
        .subscribe(EventType::Logs, Some(filter.clone()), |_| async {})
        .await
        .unwrap();
    let pending = client
        .subscribe(EventType::NewPendingTransactions, None, |_| async {})
        .await
        .unwrap();
    let subs = [&heads, &logs, &pending];

    let mut before = Vec::new();
    for sub in subs {
        before.push(
            tokio::time::timeout(TIMEOUT, sub.confirmed())
                .await
                .unwrap()
                .unwrap(),
        );
    }

    server.drop_connections();
    let resent = server.wait_for_requests("eth_subscribe", 6).await;
    assert_eq!(resent.len(), 6);

    // Reissued in creation order with the original params
    assert_eq!(resent[3]["params"], json!(["newHeads"]));
    assert_eq!(resent[4]["params"], json!(["logs", filter]));
    assert_eq!(resent[5]["params"], json!(["newPendingTransactions"]));

    for (sub, old) in subs.iter().zip(&before) {
        assert!(
            eventually(|| sub.physical_id().is_some_and(|id| &id != old)).await,
            "subscription {} was not rebound",
            sub.id()
        );
    }

    let snapshot = client.subscriptions().await;
    let ids: Vec<_> = snapshot.iter().map(|info| info.id).collect();
    assert_eq!(ids, vec![heads.id(), logs.id(), pending.id()]);
}

#[tokio::test]
async fn test_subscribe_after_reconnect() {
    let server = MockEthServer::start().await;
    let client = connect(&server).await;

    server.drop_connections();
    assert!(eventually(|| server.accepted_connections() == 2 && client.is_connected()).await);

    let collected = Collected::new();
    let sub = client
        .subscribe(EventType::NewHeads, None, collected.handler())
        .await
        .unwrap();
    let physical_id = tokio::time::timeout(TIMEOUT, sub.confirmed())
        .await
        .unwrap()
        .unwrap();

    server.push(physical_id.as_str(), json!("after"));
    assert!(eventually(|| collected.len() == 1).await);
    assert_eq!(server.received("eth_subscribe").len(), 1);
}

#[tokio::test]
async fn test_reconnect_exhausted_fails_subscriptions() {
    let server = MockEthServer::start().await;
    let client = ClientBuilder::new(server.url())
        .with_reconnect(Box::new(
            FixedDelay::new(Duration::from_millis(20)).with_max_attempts(2),
        ))
        .without_heartbeat()
        .connect()
        .await
        .unwrap();

    let sub = client
        .subscribe(EventType::NewHeads, None, |_| async {})
        .await
        .unwrap();
    tokio::time::timeout(TIMEOUT, sub.confirmed())
        .await
        .unwrap()
        .unwrap();

    let mut states = client.state_changes();
    server.shutdown().await;

    let failed = tokio::time::timeout(
        TIMEOUT,
        states.wait_for(|state| state.is_terminal()),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(failed, ConnectionState::Failed { attempts: 3 });

    assert!(
        eventually(|| sub.status() == SubscriptionStatus::Failed { attempts: 3 }).await
    );
    assert!(matches!(
        sub.confirmed().await,
        Err(Error::ReconnectExhausted { attempts: 3 })
    ));
    assert!(matches!(
        client
            .subscribe(EventType::NewHeads, None, |_| async {})
            .await,
        Err(Error::ReconnectExhausted { attempts: 3 })
    ));
    assert_eq!(client.subscription_count().await, 0);
}

#[tokio::test]
async fn test_initial_connect_retries_then_fails() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = test_builder(&format!("ws://{}", addr))
        .with_reconnect(Box::new(
            FixedDelay::new(Duration::from_millis(10)).with_max_attempts(1),
        ))
        .connect()
        .await;

    assert!(matches!(result, Err(Error::ReconnectExhausted { attempts: 2 })));
}
