//! Integration tests for hub-server.
//!
//! Each test runs real channel servers on ephemeral loopback ports and talks to
//! them with plain TCP clients.

use std::sync::Arc;
use std::time::Duration;

use hub_protocol::{encode, FrameDecoder};
use hub_server::{
    Channel, ConnectionServer, HandlerState, HubError, Message, Router, ServerConfig,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

/// Router whose processor forwards every message on `channel` to the returned receiver.
async fn recording_router(channel: Channel) -> (Arc<Router>, mpsc::UnboundedReceiver<Message>) {
    let router = Arc::new(Router::new());
    let (tx, rx) = mpsc::unbounded_channel();
    router
        .register_processor(channel, move |message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message);
                Ok(())
            }
        })
        .await;
    (router, rx)
}

async fn start_server(channel: Channel, push: bool, router: Arc<Router>) -> (ConnectionServer, String) {
    let server = ConnectionServer::new(
        ServerConfig::new(channel, "127.0.0.1:0").with_push(push),
        router,
    );
    let addr = server.start().await.expect("server should start");
    (server, addr.to_string())
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for processor")
        .expect("processor channel closed")
}

async fn read_message(stream: &mut TcpStream, decoder: &mut FrameDecoder) -> Message {
    let mut buf = [0u8; 1024];
    timeout(WAIT, async {
        loop {
            let n = stream.read(&mut buf).await.expect("read failed");
            assert!(n > 0, "server closed connection");
            if let Some(frame) = decoder.feed(&buf[..n]).into_iter().next() {
                return frame.expect("server sent undecodable frame");
            }
        }
    })
    .await
    .expect("timed out waiting for server message")
}

#[tokio::test]
async fn test_face_identity_is_processed_and_acknowledged() {
    let router = Arc::new(Router::new());
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let weak = Arc::downgrade(&router);
    router
        .register_processor(Channel::face(), move |message: Message| {
            let seen_tx = seen_tx.clone();
            let weak = weak.clone();
            async move {
                let member = message.member_id().unwrap_or_default().to_string();
                let _ = seen_tx.send(message);
                if let Some(router) = weak.upgrade() {
                    let ack = Message::new().with("cmd", "ack").with("member_id", member);
                    router.broadcast(&Channel::face(), &ack);
                }
                Ok(())
            }
        })
        .await;

    let (server, addr) = start_server(Channel::face(), true, router).await;
    let mut client = TcpStream::connect(&addr).await.unwrap();
    client
        .write_all(&encode(&Message::identity("Face", "alice")))
        .await
        .unwrap();

    let seen = recv(&mut seen_rx).await;
    assert_eq!(seen.member_id(), Some("alice"));
    assert_eq!(seen.get_str("camera_id"), Some("Face"));

    let mut decoder = FrameDecoder::new();
    let ack = read_message(&mut client, &mut decoder).await;
    assert_eq!(ack.get_str("cmd"), Some("ack"));
    assert_eq!(ack.member_id(), Some("alice"));

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_clients_are_all_served() {
    let (router, mut rx) = recording_router(Channel::cart()).await;
    let (server, addr) = start_server(Channel::cart(), false, router).await;

    let mut clients = Vec::new();
    for i in 0..8 {
        let mut client = TcpStream::connect(&addr).await.unwrap();
        client
            .write_all(&encode(&Message::identity("Cart", &format!("member-{}", i))))
            .await
            .unwrap();
        clients.push(client);
    }

    let mut members = Vec::new();
    for _ in 0..8 {
        members.push(recv(&mut rx).await.member_id().unwrap().to_string());
    }
    members.sort();
    let mut expected: Vec<_> = (0..8).map(|i| format!("member-{}", i)).collect();
    expected.sort();
    assert_eq!(members, expected);

    let registry = server.registry().clone();
    wait_until(|| registry.len() == 8).await;

    drop(clients);
    wait_until(|| registry.is_empty()).await;
    server.stop().await;
}

#[tokio::test]
async fn test_messages_from_one_connection_keep_their_order() {
    let (router, mut rx) = recording_router(Channel::face()).await;
    let (server, addr) = start_server(Channel::face(), false, router).await;

    let mut stream = Vec::new();
    for i in 0..50 {
        stream.extend_from_slice(&encode(&Message::identity("Face", &i.to_string())));
    }
    let mut client = TcpStream::connect(&addr).await.unwrap();
    // Write in uneven pieces so frames straddle reads.
    for piece in stream.chunks(37) {
        client.write_all(piece).await.unwrap();
    }

    for i in 0..50 {
        assert_eq!(recv(&mut rx).await.member_id(), Some(i.to_string().as_str()));
    }
    server.stop().await;
}

#[tokio::test]
async fn test_truncated_frame_does_not_poison_connection() {
    let (router, mut rx) = recording_router(Channel::face()).await;
    let (server, addr) = start_server(Channel::face(), false, router).await;

    let mut client = TcpStream::connect(&addr).await.unwrap();
    client.write_all(br#"{"camera_id":"#).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    client
        .write_all(&encode(&Message::identity("Face", "alice")))
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await.member_id(), Some("alice"));

    client
        .write_all(&encode(&Message::identity("Face", "bob")))
        .await
        .unwrap();
    assert_eq!(recv(&mut rx).await.member_id(), Some("bob"));
    assert!(rx.try_recv().is_err());

    let handle = server.registry().handles().remove(0);
    assert_eq!(handle.decode_failures(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_failing_and_panicking_processors_keep_connection_alive() {
    let router = Arc::new(Router::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    router
        .register_processor(Channel::face(), move |message: Message| {
            let tx = tx.clone();
            async move {
                let member = message.member_id().map(str::to_owned);
                match member.as_deref() {
                    Some("bad") => anyhow::bail!("rejected member"),
                    Some("boom") => panic!("processor crashed"),
                    _ => {
                        let _ = tx.send(message);
                        Ok(())
                    }
                }
            }
        })
        .await;
    let (server, addr) = start_server(Channel::face(), false, router).await;

    let mut client = TcpStream::connect(&addr).await.unwrap();
    for member in ["bad", "boom", "alice"] {
        client
            .write_all(&encode(&Message::identity("Face", member)))
            .await
            .unwrap();
    }

    assert_eq!(recv(&mut rx).await.member_id(), Some("alice"));
    assert_eq!(server.connection_count(), 1);
    server.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent_and_closes_clients() {
    let (router, _rx) = recording_router(Channel::face()).await;
    let (server, addr) = start_server(Channel::face(), true, router.clone()).await;

    let mut client = TcpStream::connect(&addr).await.unwrap();
    let registry = server.registry().clone();
    wait_until(|| registry.len() == 1).await;
    let handle = registry.handles().remove(0);

    server.stop().await;
    server.stop().await;

    assert_eq!(handle.state(), HandlerState::Stopped);
    handle.stop().await;
    assert!(registry.is_empty());
    assert!(!router.supports_push(&Channel::face()));

    let mut buf = [0u8; 16];
    let n = timeout(WAIT, client.read(&mut buf))
        .await
        .expect("client should observe close")
        .unwrap_or(0);
    assert_eq!(n, 0);

    assert!(TcpStream::connect(&addr).await.is_err());
}

#[tokio::test]
async fn test_stop_is_not_blocked_by_device_that_stopped_reading() {
    let (router, _rx) = recording_router(Channel::face()).await;
    let (server, addr) = start_server(Channel::face(), true, router.clone()).await;

    // Connected but never reads, so its receive window fills up.
    let _client = TcpStream::connect(&addr).await.unwrap();
    let registry = server.registry().clone();
    wait_until(|| registry.handles().iter().any(|handle| handle.is_running())).await;

    let blob = Message::new()
        .with("cmd", "ack")
        .with("payload", "x".repeat(1024 * 1024));
    let mut accepted = 0;
    for _ in 0..64 {
        accepted += router.broadcast(&Channel::face(), &blob);
    }
    assert!(accepted > 0);
    // Let the handler block on the full socket.
    sleep(Duration::from_millis(200)).await;

    timeout(Duration::from_secs(3), server.stop())
        .await
        .expect("stop should not wait on a stalled device");
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_broadcast_racing_disconnect_is_safe() {
    let (router, _rx) = recording_router(Channel::face()).await;
    let (server, addr) = start_server(Channel::face(), true, router.clone()).await;

    let client = TcpStream::connect(&addr).await.unwrap();
    let registry = server.registry().clone();
    wait_until(|| registry.len() == 1).await;

    let ack = Message::new().with("cmd", "ack");
    drop(client);
    timeout(WAIT, async {
        while !registry.is_empty() {
            router.broadcast(&Channel::face(), &ack);
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("disconnect should be observed");

    assert_eq!(router.broadcast(&Channel::face(), &ack), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_broadcast_to_channel_without_push() {
    let (router, _rx) = recording_router(Channel::cart()).await;
    let (server, addr) = start_server(Channel::cart(), false, router.clone()).await;

    let _client = TcpStream::connect(&addr).await.unwrap();
    let registry = server.registry().clone();
    wait_until(|| registry.len() == 1).await;

    assert_eq!(router.broadcast(&Channel::cart(), &Message::new().with("cmd", "ack")), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_bind_on_occupied_port_fails() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = occupied.local_addr().unwrap().to_string();

    let server = ConnectionServer::new(
        ServerConfig::new(Channel::face(), addr.clone()),
        Arc::new(Router::new()),
    );
    match server.start().await {
        Err(HubError::Bind { channel, addr: failed, .. }) => {
            assert_eq!(channel, Channel::face());
            assert_eq!(failed, addr);
        }
        other => panic!("expected bind error, got {:?}", other.map(|a| a.to_string())),
    }
    assert!(server.local_addr().is_none());
    server.stop().await;
}

#[tokio::test]
async fn test_two_channels_share_one_router() {
    let router = Arc::new(Router::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    for channel in [Channel::face(), Channel::cart()] {
        let tx = tx.clone();
        let tag = channel.clone();
        router
            .register_processor(channel, move |message: Message| {
                let tx = tx.clone();
                let tag = tag.clone();
                async move {
                    let _ = tx.send((tag, message));
                    Ok(())
                }
            })
            .await;
    }

    let (face, face_addr) = start_server(Channel::face(), true, router.clone()).await;
    let (cart, cart_addr) = start_server(Channel::cart(), false, router.clone()).await;

    let mut face_client = TcpStream::connect(&face_addr).await.unwrap();
    face_client
        .write_all(&encode(&Message::identity("Face", "alice")))
        .await
        .unwrap();
    let (channel, message) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(channel, Channel::face());
    assert_eq!(message.member_id(), Some("alice"));

    let mut cart_client = TcpStream::connect(&cart_addr).await.unwrap();
    cart_client
        .write_all(&encode(&Message::identity(2, "bob")))
        .await
        .unwrap();
    let (channel, message) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(channel, Channel::cart());
    assert_eq!(message.camera_id(), Some(&serde_json::json!(2)));

    face.stop().await;
    cart.stop().await;
}
