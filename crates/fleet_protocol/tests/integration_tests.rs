//! Integration tests for the protocol engine over real TCP sockets
//!
//! A "master" engine accepts a connection from a "node" engine that runs a
//! cluster mirror, and the tests verify packets flow both ways.

use fleet_protocol::*;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration, Instant};

/// Polls `check` until it holds or two seconds pass.
async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Binds an ephemeral listener and attaches every accepted socket to `engine`.
async fn serve(engine: Arc<ProtocolEngine>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, remote)) = listener.accept().await {
            engine.attach(stream, remote);
        }
    });
    addr
}

#[tokio::test(flavor = "multi_thread")]
async fn test_handshake_and_mirror_sync_over_tcp() {
    let master = ProtocolEngine::new(DEFAULT_MAX_FRAME_LEN);
    let (handshake_tx, mut handshake_rx) = mpsc::unbounded_channel();
    master
        .on::<NodeHandshakePacket, _>(move |packet, ctx| {
            ctx.set_node(NodeInfo::from(&packet))?;
            let group = ServiceGroup::new("lobby", "Master", 512, false, GameServerVersion::Paper1_20);
            ctx.reply(&GroupUpdatePacket::from(&group))?;
            let _ = handshake_tx.send(ctx.connection);
            Ok(())
        })
        .unwrap();
    let addr = serve(Arc::clone(&master)).await;

    let node = ProtocolEngine::new(DEFAULT_MAX_FRAME_LEN);
    let mirror = ClusterMirror::new();
    mirror.install(&node).unwrap();
    let upstream = node.connect(addr).await.unwrap();
    node.send(
        upstream,
        &NodeHandshakePacket {
            name: "Worker-1".to_string(),
            kind: NodeKind::Worker,
            host: "127.0.0.1".to_string(),
        },
    )
    .unwrap();

    let connection = timeout(Duration::from_secs(2), handshake_rx.recv())
        .await
        .expect("handshake not received")
        .unwrap();
    assert_eq!(master.connection_for_node("Worker-1"), Some(connection));
    assert!(eventually(|| mirror.group("lobby").is_some()).await);

    // broadcasts from the master land in the node's mirror too
    master.broadcast(&GroupRemovePacket { name: "lobby".to_string() });
    assert!(eventually(|| mirror.group("lobby").is_none()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_hook_reports_lost_node() {
    let master = ProtocolEngine::new(DEFAULT_MAX_FRAME_LEN);
    master
        .on::<NodeHandshakePacket, _>(|packet, ctx| ctx.set_node(NodeInfo::from(&packet)))
        .unwrap();
    let (lost_tx, mut lost_rx) = mpsc::unbounded_channel();
    master.on_close(move |_, node| {
        let _ = lost_tx.send(node.map(|node| node.name.clone()));
    });
    let addr = serve(Arc::clone(&master)).await;

    let node = ProtocolEngine::new(DEFAULT_MAX_FRAME_LEN);
    let upstream = node.connect(addr).await.unwrap();
    node.send(
        upstream,
        &NodeHandshakePacket {
            name: "Worker-2".to_string(),
            kind: NodeKind::Worker,
            host: "127.0.0.1".to_string(),
        },
    )
    .unwrap();
    assert!(eventually(|| master.connection_for_node("Worker-2").is_some()).await);

    node.disconnect(upstream);

    let lost = timeout(Duration::from_secs(2), lost_rx.recv())
        .await
        .expect("close hook not run")
        .unwrap();
    assert_eq!(lost.as_deref(), Some("Worker-2"));
    assert_eq!(master.connection_count(), 0);
}
