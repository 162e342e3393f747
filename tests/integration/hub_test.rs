// tests/integration/hub_test.rs

//! Hub lifecycle, registry and fan-out behaviour.

use super::fixtures::{GatedConnection, MockConnection, fast_hub_config, started_hub, wait_until};
use serde_json::json;
use spinelhub::config::HubConfig;
use spinelhub::connection::Connection;
use spinelhub::core::{Hub, HubError, Message, SharedConnection};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SETTLE: Duration = Duration::from_secs(2);

async fn register(hub: &Hub, conn: &Arc<MockConnection>) {
    let shared: SharedConnection = conn.clone();
    hub.register_connection(shared).await.unwrap();
    let id = conn.id().to_string();
    assert!(wait_until(|| hub.get_connection(&id).is_some(), SETTLE).await);
}

#[tokio::test]
async fn test_start_and_stop() {
    let hub = Hub::new(fast_hub_config());
    assert!(!hub.is_running());

    let root = CancellationToken::new();
    hub.start(&root).unwrap();
    assert!(hub.is_running());
    assert_eq!(hub.start(&root), Err(HubError::AlreadyRunning));

    hub.stop().await.unwrap();
    assert!(!hub.is_running());
    // Stopping a stopped hub is a no-op.
    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_hub_can_restart_after_stop() {
    let (hub, root) = started_hub(fast_hub_config());
    hub.stop().await.unwrap();
    hub.start(&root).unwrap();

    let conn = MockConnection::new("c1");
    register(&hub, &conn).await;
    assert_eq!(hub.connection_count(), 1);
    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_operations_fail_when_not_running() {
    let hub = Hub::new(HubConfig::default());
    let ctx = CancellationToken::new();

    let conn: SharedConnection = MockConnection::new("c1");
    assert_eq!(hub.register_connection(conn).await, Err(HubError::NotRunning));
    assert_eq!(hub.unregister_connection("c1").await, Err(HubError::NotRunning));
    assert_eq!(
        hub.broadcast(&ctx, Message::new("m1", "notice", json!("hi"))).await,
        Err(HubError::NotRunning)
    );
    assert_eq!(
        hub.send_to_connection(&ctx, "c1", Message::new("m1", "notice", json!("hi")))
            .await,
        Err(HubError::NotRunning)
    );
    assert_eq!(hub.connection_count(), 0);
}

#[tokio::test]
async fn test_register_and_unregister() {
    let (hub, _root) = started_hub(fast_hub_config());
    let conn = MockConnection::new("c1");

    register(&hub, &conn).await;
    assert_eq!(hub.connection_count(), 1);
    assert_eq!(hub.get_connection("c1").unwrap().id(), "c1");

    hub.unregister_connection("c1").await.unwrap();
    assert!(wait_until(|| hub.connection_count() == 0, SETTLE).await);
    assert!(hub.get_connection("c1").is_none());
    assert!(conn.is_closed(), "unregister closes the connection");

    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_unregister_unknown_id_is_accepted() {
    let (hub, _root) = started_hub(fast_hub_config());
    let conn = MockConnection::new("c1");
    register(&hub, &conn).await;

    hub.unregister_connection("missing").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hub.connection_count(), 1);
    assert!(!conn.is_closed());

    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_get_connections_by_type() {
    let (hub, _root) = started_hub(fast_hub_config());
    let a = MockConnection::with_type("a", "sse");
    let b = MockConnection::with_type("b", "websocket");
    let c = MockConnection::with_type("c", "sse");
    for conn in [&a, &b, &c] {
        register(&hub, conn).await;
    }

    let mut sse: Vec<String> = hub
        .get_connections_by_type("sse")
        .iter()
        .map(|conn| conn.id().to_string())
        .collect();
    sse.sort();
    assert_eq!(sse, vec!["a", "c"]);
    assert_eq!(hub.get_connections_by_type("websocket").len(), 1);
    assert!(hub.get_connections_by_type("carrier-pigeon").is_empty());
    assert_eq!(hub.get_connections().len(), 3);

    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_delivers_once_to_every_connection() {
    let (hub, _root) = started_hub(fast_hub_config());
    let conns: Vec<_> = (0..5)
        .map(|i| MockConnection::new(&format!("c{i}")))
        .collect();
    for conn in &conns {
        register(&hub, conn).await;
    }

    let ctx = CancellationToken::new();
    hub.broadcast(&ctx, Message::new("m1", "notice", json!({"n": 1})))
        .await
        .unwrap();

    for conn in &conns {
        assert!(wait_until(|| conn.received_ids() == vec!["m1"], SETTLE).await);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    for conn in &conns {
        assert_eq!(conn.received_ids(), vec!["m1"]);
    }

    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_with_no_connections_succeeds() {
    let (hub, _root) = started_hub(fast_hub_config());
    let ctx = CancellationToken::new();
    hub.broadcast(&ctx, Message::new("m1", "notice", json!(null)))
        .await
        .unwrap();
    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_removes_failing_connection() {
    let (hub, _root) = started_hub(fast_hub_config());
    let healthy = MockConnection::new("healthy");
    let broken = MockConnection::failing("broken");
    register(&hub, &healthy).await;
    register(&hub, &broken).await;

    let ctx = CancellationToken::new();
    hub.broadcast(&ctx, Message::new("m1", "notice", json!("hi")))
        .await
        .unwrap();

    assert!(wait_until(|| hub.get_connection("broken").is_none(), SETTLE).await);
    assert!(broken.is_closed());
    assert!(wait_until(|| healthy.received_ids() == vec!["m1"], SETTLE).await);
    assert!(hub.get_connection("healthy").is_some());

    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_to_type_filters_recipients() {
    let (hub, _root) = started_hub(fast_hub_config());
    let sse = MockConnection::with_type("s1", "sse");
    let ws = MockConnection::with_type("w1", "websocket");
    register(&hub, &sse).await;
    register(&hub, &ws).await;

    let ctx = CancellationToken::new();
    hub.broadcast_to_type(&ctx, "websocket", Message::new("m1", "notice", json!("hi")))
        .await
        .unwrap();

    assert!(wait_until(|| ws.received_ids() == vec!["m1"], SETTLE).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sse.received_ids().is_empty());

    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_with_cancelled_context() {
    let (hub, _root) = started_hub(fast_hub_config());
    let conn = MockConnection::new("c1");
    register(&hub, &conn).await;

    let ctx = CancellationToken::new();
    ctx.cancel();
    let result = hub
        .broadcast(&ctx, Message::new("m1", "notice", json!("hi")))
        .await;
    assert_eq!(result, Err(HubError::Cancelled));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(conn.received_ids().is_empty());

    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_send_to_connection() {
    let (hub, _root) = started_hub(fast_hub_config());
    let conn = MockConnection::new("c1");
    register(&hub, &conn).await;

    let ctx = CancellationToken::new();
    hub.send_to_connection(&ctx, "c1", Message::new("m1", "notice", json!("hi")))
        .await
        .unwrap();
    assert_eq!(conn.received_ids(), vec!["m1"]);

    let missing = hub
        .send_to_connection(&ctx, "nope", Message::new("m2", "notice", json!("hi")))
        .await;
    assert_eq!(missing, Err(HubError::NotFound("nope".into())));

    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_send_to_connection_failure_unregisters() {
    let (hub, _root) = started_hub(fast_hub_config());
    let broken = MockConnection::failing("broken");
    register(&hub, &broken).await;

    let ctx = CancellationToken::new();
    let result = hub
        .send_to_connection(&ctx, "broken", Message::new("m1", "notice", json!("hi")))
        .await;
    assert!(matches!(result, Err(HubError::Write(_))));
    assert!(wait_until(|| hub.get_connection("broken").is_none(), SETTLE).await);

    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_closes_all_connections() {
    let (hub, _root) = started_hub(fast_hub_config());
    let conns: Vec<_> = (0..3)
        .map(|i| MockConnection::new(&format!("c{i}")))
        .collect();
    for conn in &conns {
        register(&hub, conn).await;
    }

    hub.stop().await.unwrap();
    assert_eq!(hub.connection_count(), 0);
    for conn in &conns {
        assert!(conn.is_closed());
    }
}

#[tokio::test]
async fn test_stop_closes_connections_still_queued_for_registration() {
    for round in 0..200 {
        let (hub, _root) = started_hub(fast_hub_config());
        let conn = MockConnection::new(&format!("queued-{round}"));
        let shared: SharedConnection = conn.clone();
        hub.register_connection(shared).await.unwrap();

        hub.stop().await.unwrap();
        assert!(conn.is_closed(), "round {round}: connection left open after stop");
        assert_eq!(hub.connection_count(), 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_channels_time_out() {
    let config = HubConfig {
        register_capacity: 1,
        unregister_capacity: 1,
        enqueue_timeout: Duration::from_millis(200),
        cleanup_interval: Duration::from_secs(3600),
        ..fast_hub_config()
    };
    let (hub, _root) = started_hub(config);

    // The loop blocks inside this registration until the gate opens.
    let (gated, open_gate) = GatedConnection::new("gated");
    let gated: SharedConnection = gated;
    hub.register_connection(gated).await.unwrap();

    let queued: SharedConnection = MockConnection::new("queued");
    hub.register_connection(queued).await.unwrap();
    let overflow: SharedConnection = MockConnection::new("overflow");
    assert_eq!(
        hub.register_connection(overflow).await,
        Err(HubError::Timeout("registering connection"))
    );

    hub.unregister_connection("a").await.unwrap();
    assert_eq!(
        hub.unregister_connection("b").await,
        Err(HubError::Timeout("unregistering connection"))
    );

    open_gate.send(()).unwrap();
    assert!(wait_until(|| hub.get_connection("queued").is_some(), SETTLE).await);
    assert!(hub.get_connection("overflow").is_none());

    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_id_is_rejected() {
    let (hub, _root) = started_hub(fast_hub_config());
    let first = MockConnection::new("dup");
    register(&hub, &first).await;

    let second = MockConnection::new("dup");
    let shared: SharedConnection = second.clone();
    hub.register_connection(shared).await.unwrap();
    assert!(wait_until(|| second.is_closed(), SETTLE).await);

    // The rejected duplicate's cancellation must not evict the original.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!first.is_closed());
    assert_eq!(hub.connection_count(), 1);

    let ctx = CancellationToken::new();
    hub.send_to_connection(&ctx, "dup", Message::new("m1", "notice", json!("hi")))
        .await
        .unwrap();
    assert_eq!(first.received_ids(), vec!["m1"]);
    assert!(second.received_ids().is_empty());

    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_parent_cancellation_stops_event_loop() {
    let (hub, root) = started_hub(fast_hub_config());
    root.cancel();

    let conn: SharedConnection = MockConnection::new("late");
    assert_eq!(hub.register_connection(conn).await, Err(HubError::ShuttingDown));
    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_cleanup_sweep_evicts_closed_connections() {
    let (hub, _root) = started_hub(fast_hub_config());
    let conn = MockConnection::new("stale");
    register(&hub, &conn).await;

    conn.close_silently();
    assert!(wait_until(|| hub.connection_count() == 0, SETTLE).await);

    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_connection_cancellation_unregisters() {
    let config = HubConfig {
        cleanup_interval: Duration::from_secs(3600),
        ..fast_hub_config()
    };
    let (hub, _root) = started_hub(config);
    let conn = MockConnection::new("c1");
    register(&hub, &conn).await;

    conn.context().cancel();
    assert!(wait_until(|| hub.connection_count() == 0, SETTLE).await);

    hub.stop().await.unwrap();
}
