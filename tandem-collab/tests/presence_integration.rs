//! Integration tests for cursor, selection and transform-preview relay.
//!
//! Two or three clients connect to a real server; ephemeral updates from
//! one must show up in the others' presence rooms without touching the
//! op journal.

use std::time::Instant;

use tandem_collab::client::{SyncClient, SyncEvent};
use tandem_collab::server::{ServerConfig, SyncServer};
use tandem_collab::session::Session;
use tandem_core::{Color, Editor, Property, PropertyValue, ShapeKind, ShapeLookup, Vec2};
use tokio::time::{timeout, Duration};

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port, return the port.
async fn start_test_server() -> u16 {
    let port = free_port().await;
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..ServerConfig::default()
    };
    let server = SyncServer::new(config);
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

/// Connect a client and wait until it has been welcomed.
async fn connect_client(url: &str) -> (SyncClient, tokio::sync::mpsc::Receiver<SyncEvent>) {
    let mut client = SyncClient::new(url);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    timeout(Duration::from_secs(2), async {
        while let Some(event) = events.recv().await {
            if matches!(event, SyncEvent::Welcomed { .. }) {
                return;
            }
        }
    })
    .await
    .expect("welcome within timeout");
    (client, events)
}

async fn wait_until(client: &SyncClient, pred: impl Fn(&Session) -> bool) {
    timeout(Duration::from_secs(2), async {
        while !client.with_session(&pred).await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition within timeout");
}

// ─── Presence Relay Tests ────────────────────────────────────────

#[tokio::test]
async fn test_cursor_reaches_peer() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let (alice, _a) = connect_client(&url).await;
    let (bob, _b) = connect_client(&url).await;
    let alice_id = alice.client_id().await.unwrap();

    alice
        .edit(|s| s.update_cursor(Some(Vec2::new(12.0, 34.0)), Instant::now()))
        .await;

    wait_until(&bob, |s| {
        s.room()
            .peer(alice_id)
            .and_then(|p| p.cursor)
            == Some(Vec2::new(12.0, 34.0))
    })
    .await;
}

#[tokio::test]
async fn test_trailing_cursor_is_flushed() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let (alice, _a) = connect_client(&url).await;
    let (bob, _b) = connect_client(&url).await;
    let alice_id = alice.client_id().await.unwrap();

    // Burst within one throttle window: only the last position matters.
    let now = Instant::now();
    for i in 0..10 {
        let x = i as f64;
        alice
            .edit(move |s| s.update_cursor(Some(Vec2::new(x, x)), now))
            .await;
    }

    wait_until(&bob, |s| {
        s.room()
            .peer(alice_id)
            .and_then(|p| p.cursor)
            == Some(Vec2::new(9.0, 9.0))
    })
    .await;
}

#[tokio::test]
async fn test_selection_reaches_peer() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let (alice, _a) = connect_client(&url).await;
    let (bob, _b) = connect_client(&url).await;
    let alice_id = alice.client_id().await.unwrap();

    let id = alice
        .edit(|s| s.create_shape(ShapeKind::Rect, Vec2::ZERO, Color::BLACK))
        .await
        .unwrap();
    alice
        .edit(|s| s.update_selection(vec![id], Instant::now()))
        .await;

    wait_until(&bob, |s| {
        s.room()
            .peer(alice_id)
            .is_some_and(|p| p.selection == vec![id])
    })
    .await;
}

#[tokio::test]
async fn test_transform_preview_links_remote_editor() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let (alice, _a) = connect_client(&url).await;
    let (bob, _b) = connect_client(&url).await;
    let alice_id = alice.client_id().await.unwrap();

    let id = alice
        .edit(|s| s.create_shape(ShapeKind::Rect, Vec2::ZERO, Color::BLACK))
        .await
        .unwrap();
    wait_until(&bob, |s| s.document().contains(id)).await;

    let start = Instant::now();
    alice
        .edit(|s| {
            s.begin_edit(id, &[Property::Rotation])?;
            s.set_live(id, PropertyValue::Rotation(30.0), start)
        })
        .await
        .unwrap();

    wait_until(&bob, |s| {
        s.document()
            .overlay()
            .is_edited_by(id, Editor::Remote(alice_id))
            && s.room().transforming(id).any(|c| c == alice_id)
    })
    .await;
    // Previews never change the durable document.
    assert_eq!(
        bob.with_session(|s| s.document().shape(id).map(|sh| sh.rotation))
            .await,
        Some(0.0)
    );

    alice
        .edit(|s| {
            s.commit_edit(id, &[Property::Rotation], start + Duration::from_millis(100))
        })
        .await
        .unwrap();

    wait_until(&bob, |s| {
        !s.document()
            .overlay()
            .is_edited_by(id, Editor::Remote(alice_id))
            && s.document().shape(id).map(|sh| sh.rotation) == Some(30.0)
    })
    .await;
}

#[tokio::test]
async fn test_late_joiner_sees_presence_snapshot() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let (alice, _a) = connect_client(&url).await;
    let (bob, _b) = connect_client(&url).await;
    let alice_id = alice.client_id().await.unwrap();

    alice
        .edit(|s| s.update_cursor(Some(Vec2::new(5.0, 6.0)), Instant::now()))
        .await;
    wait_until(&bob, |s| s.room().peer(alice_id).is_some()).await;

    let (carol, _c) = connect_client(&url).await;
    let peer = carol
        .with_session(|s| s.room().peer(alice_id).cloned())
        .await
        .expect("snapshot in Welcome");
    assert_eq!(peer.cursor, Some(Vec2::new(5.0, 6.0)));
}

#[tokio::test]
async fn test_peer_removed_on_leave() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let (mut alice, _a) = connect_client(&url).await;
    let (bob, mut bob_events) = connect_client(&url).await;
    let alice_id = alice.client_id().await.unwrap();

    alice
        .edit(|s| s.update_cursor(Some(Vec2::ONE), Instant::now()))
        .await;
    wait_until(&bob, |s| s.room().peer(alice_id).is_some()).await;

    alice.disconnect().await;

    let left = timeout(Duration::from_secs(2), async {
        while let Some(event) = bob_events.recv().await {
            if event == SyncEvent::PeerLeft(alice_id) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(left);
    assert_eq!(bob.with_session(|s| s.room().peer_count()).await, 0);
}
