//! End-to-end tests of the master
//!
//! Worker and proxy nodes are played by `ProtocolEngine`s connected over real
//! TCP sockets to a running `MasterServer`.

use async_trait::async_trait;
use fleet_master::*;
use fleet_protocol::*;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout, Duration, Instant};
use uuid::Uuid;

/// Polls `check` until it holds or three seconds pass.
async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Launcher that accepts every request without contacting a node.
#[derive(Debug, Default)]
struct AcceptingLauncher {
    started: Mutex<Vec<String>>,
}

#[async_trait]
impl ServiceLauncher for AcceptingLauncher {
    async fn start(&self, service: &Service) -> Result<(), LaunchError> {
        self.started.lock().unwrap().push(service.name.clone());
        Ok(())
    }

    async fn stop(&self, _service: &Service) -> Result<(), LaunchError> {
        Ok(())
    }
}

/// Launcher whose nodes accept starts but are gone by the time a stop arrives.
#[derive(Debug, Default)]
struct VanishingLauncher {
    started: Mutex<Vec<String>>,
}

#[async_trait]
impl ServiceLauncher for VanishingLauncher {
    async fn start(&self, service: &Service) -> Result<(), LaunchError> {
        self.started.lock().unwrap().push(service.name.clone());
        Ok(())
    }

    async fn stop(&self, service: &Service) -> Result<(), LaunchError> {
        Err(LaunchError::NodeUnavailable(service.node.clone()))
    }
}

/// In-memory storage whose deletes take a while.
#[derive(Debug, Default)]
struct SlowDeleteGateway {
    inner: MemoryGateway,
}

#[async_trait]
impl PersistenceGateway for SlowDeleteGateway {
    async fn connect(&self) -> Result<(), PersistenceError> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<(), PersistenceError> {
        self.inner.disconnect().await
    }

    async fn save_group(&self, group: &ServiceGroup) -> Result<(), PersistenceError> {
        self.inner.save_group(group).await
    }

    async fn load_all_groups(&self) -> Result<Vec<ServiceGroup>, PersistenceError> {
        self.inner.load_all_groups().await
    }

    async fn delete_group(&self, name: &str) -> Result<(), PersistenceError> {
        sleep(Duration::from_millis(100)).await;
        self.inner.delete_group(name).await
    }
}

fn local_context() -> (Arc<CloudContext>, Arc<AcceptingLauncher>) {
    let launcher = Arc::new(AcceptingLauncher::default());
    let ctx = CloudContext::with_launcher(
        MasterConfig::default(),
        Arc::new(MemoryGateway::new()),
        launcher.clone(),
    )
    .unwrap();
    (ctx, launcher)
}

/// Starts a master on an ephemeral port.
async fn spawn_master(ctx: Arc<CloudContext>) -> (Arc<MasterServer>, std::net::SocketAddr) {
    let server = Arc::new(MasterServer::new(ctx));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let running = Arc::clone(&server);
    tokio::spawn(async move { running.serve(listener).await });
    (server, addr)
}

/// Connects a node engine with a cluster mirror and performs the handshake.
async fn join_node(
    addr: std::net::SocketAddr,
    name: &str,
    kind: NodeKind,
    setup: impl FnOnce(&Arc<ProtocolEngine>),
) -> (Arc<ProtocolEngine>, Arc<ClusterMirror>, ConnectionId) {
    let node = ProtocolEngine::new(DEFAULT_MAX_FRAME_LEN);
    let mirror = ClusterMirror::new();
    mirror.install(&node).unwrap();
    setup(&node);
    let upstream = node.connect(addr).await.unwrap();
    node.send(
        upstream,
        &NodeHandshakePacket {
            name: name.to_string(),
            kind,
            host: "127.0.0.1".to_string(),
        },
    )
    .unwrap();
    (node, mirror, upstream)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_group_commands_scenarios() {
    let (ctx, _) = local_context();

    let lines = execute(&ctx, "group create bedwars 512 false 1.8").await.unwrap();
    assert_eq!(lines, vec!["The group 'bedwars' is now registered and online.".to_string()]);
    let list = execute(&ctx, "group list").await.unwrap();
    assert!(list.iter().any(|line| line.starts_with("bedwars")));

    let err = execute(&ctx, "group create bedwars 512 false 1.8").await.unwrap_err();
    assert_eq!(err.to_string(), "Group 'bedwars' already exists");
    assert_eq!(ctx.groups.len(), 1);

    let err = execute(&ctx, "group edit bedwars memory notanumber").await.unwrap_err();
    assert_eq!(err.to_string(), "Use following command: group edit bedwars memory <int>");
    assert_eq!(ctx.groups.get("bedwars").unwrap().memory, 512);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reconcile_starts_exactly_min_with_sequential_ids() {
    let (ctx, launcher) = local_context();
    let mut group = ServiceGroup::new("bedwars", "Master", 512, false, GameServerVersion::Paper1_8);
    group.min_online = 2;
    group.max_online = 4;
    ctx.groups.create(group).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.queue.reconcile().await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let ids: Vec<u32> = ctx.services.get_by_group("bedwars").iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(launcher.started.lock().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_service_removal_evicts_routed_players() {
    let (ctx, _) = local_context();
    let (_server, addr) = spawn_master(Arc::clone(&ctx)).await;

    let (_worker, worker_mirror, _) = join_node(addr, "Worker-1", NodeKind::Worker, |_| {}).await;
    let (proxy, _, upstream) = join_node(addr, "Proxy-1", NodeKind::Proxy, |_| {}).await;
    assert!(eventually(|| ctx.engine.nodes().len() == 2).await);

    let group = ServiceGroup::new("bedwars", "Worker-1", 512, false, GameServerVersion::Paper1_8);
    let service = ctx
        .services
        .register(ServiceSpec::for_group(&group, "127.0.0.1", 30000));
    assert_eq!(service.name, "bedwars-1");

    let uuid = Uuid::new_v4();
    proxy
        .send(upstream, &PlayerLoginPacket { uuid, username: "Foo".to_string() })
        .unwrap();
    proxy
        .send(
            upstream,
            &PlayerUpdatePacket {
                uuid,
                proxy_service: Some("bedwars-1".to_string()),
                game_service: None,
            },
        )
        .unwrap();

    assert!(
        eventually(|| {
            ctx.players
                .get(&uuid)
                .is_some_and(|p| p.proxy_service.as_deref() == Some("bedwars-1"))
        })
        .await
    );
    assert_eq!(ctx.players.get_by_name("FOO").unwrap().uuid, uuid);
    // relayed to the other node
    assert!(eventually(|| worker_mirror.player(&uuid).is_some()).await);

    // a disconnect reported by the proxy drops the player everywhere
    let leaving = Uuid::new_v4();
    proxy
        .send(upstream, &PlayerLoginPacket { uuid: leaving, username: "Bar".to_string() })
        .unwrap();
    assert!(eventually(|| worker_mirror.player(&leaving).is_some()).await);
    proxy
        .send(upstream, &PlayerDisconnectPacket { uuid: leaving })
        .unwrap();
    assert!(eventually(|| ctx.players.get(&leaving).is_none()).await);
    assert!(eventually(|| worker_mirror.player(&leaving).is_none()).await);
    assert!(ctx.players.get_by_name("Bar").is_none());
    assert!(ctx.players.get(&uuid).is_some());

    ctx.services.unregister("bedwars-1", RemovalReason::Crashed);

    assert!(ctx.players.get(&uuid).is_none());
    assert!(eventually(|| worker_mirror.player(&uuid).is_none()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_removing_a_group_while_the_queue_runs_leaves_no_services() {
    let launcher = Arc::new(VanishingLauncher::default());
    let ctx = CloudContext::with_launcher(
        MasterConfig::default(),
        Arc::new(SlowDeleteGateway::default()),
        launcher.clone(),
    )
    .unwrap();
    let worker = ctx.queue.start().unwrap();

    let mut group = ServiceGroup::new("lobby", "Master", 512, false, GameServerVersion::Paper1_20);
    group.min_online = 2;
    group.max_online = 2;
    ctx.groups.create(group).await.unwrap();
    assert!(eventually(|| ctx.services.online_count("lobby") == 2).await);

    ctx.groups.remove("lobby").await.unwrap();
    // give the queue worker time to react to the removals
    sleep(Duration::from_millis(300)).await;

    assert!(!ctx.groups.contains("lobby"));
    assert!(ctx.services.get_by_group("lobby").is_empty());
    assert_eq!(launcher.started.lock().unwrap().len(), 2);
    worker.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_lifecycle_through_remote_launcher() {
    let ctx = CloudContext::new(MasterConfig::default(), Arc::new(MemoryGateway::new())).unwrap();
    let (_server, addr) = spawn_master(Arc::clone(&ctx)).await;

    // The worker confirms every start and stop request right away.
    let (worker, mirror, _) = join_node(addr, "Worker-1", NodeKind::Worker, |node| {
        node.on::<ServiceStartRequestPacket, _>(|packet, conn| {
            conn.reply(&ServiceStateUpdatePacket {
                name: packet.service.name,
                state: ServiceState::Online,
            })
        })
        .unwrap();
        node.on::<ServiceStopRequestPacket, _>(|packet, conn| {
            conn.reply(&ServiceStateUpdatePacket {
                name: packet.name,
                state: ServiceState::Stopped,
            })
        })
        .unwrap();
    })
    .await;
    assert!(eventually(|| ctx.engine.connection_for_node("Worker-1").is_some()).await);

    let mut group = ServiceGroup::new("bedwars", "Worker-1", 512, false, GameServerVersion::Paper1_8);
    group.min_online = 2;
    group.max_online = 4;
    ctx.groups.create(group).await.unwrap();

    let online = |names: &[&str]| {
        let ctx = Arc::clone(&ctx);
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        move || {
            let services = ctx.services.get_by_group("bedwars");
            services.len() == names.len()
                && services
                    .iter()
                    .all(|s| s.state == ServiceState::Online && names.contains(&s.name))
        }
    };
    assert!(eventually(online(&["bedwars-1", "bedwars-2"])).await);
    assert!(eventually(|| mirror.services_of("bedwars").len() == 2).await);
    assert_eq!(ctx.services.get_by_name("bedwars-1").unwrap().port, 30000);
    assert_eq!(ctx.services.get_by_name("bedwars-2").unwrap().port, 30001);

    // an operator stop is replaced to keep the group at its minimum
    execute(&ctx, "service stop bedwars-2").await.unwrap();
    assert!(eventually(online(&["bedwars-1", "bedwars-3"])).await);

    // losing the worker removes everything it hosted
    worker.shutdown();
    assert!(eventually(|| ctx.engine.connection_for_node("Worker-1").is_none()).await);
    assert!(eventually(|| ctx.services.get_by_node("Worker-1").is_empty()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_handshake_syncs_existing_state() {
    let (ctx, _) = local_context();
    execute(&ctx, "group create lobby 512 false 1.20").await.unwrap();
    let group = ctx.groups.get("lobby").unwrap();
    ctx.services
        .register(ServiceSpec::for_group(&group, "127.0.0.1", 30000));
    let (_server, addr) = spawn_master(Arc::clone(&ctx)).await;

    let (_node, mirror, _) = join_node(addr, "Proxy-1", NodeKind::Proxy, |_| {}).await;

    assert!(eventually(|| mirror.group("lobby").is_some() && mirror.service("lobby-1").is_some()).await);
    assert_eq!(mirror.group("lobby").unwrap(), group);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_groups_survive_restart_with_json_storage() {
    let dir = tempfile::tempdir().unwrap();

    {
        let gateway = Arc::new(JsonFileGateway::new(dir.path()));
        gateway.connect().await.unwrap();
        let ctx = CloudContext::with_launcher(
            MasterConfig::default(),
            gateway.clone(),
            Arc::new(AcceptingLauncher::default()),
        )
        .unwrap();
        execute(&ctx, "group create bedwars 512 false 1.8").await.unwrap();
        execute(&ctx, "group edit bedwars maxservicecount 6").await.unwrap();
        gateway.disconnect().await.unwrap();
    }

    let gateway = Arc::new(JsonFileGateway::new(dir.path()));
    gateway.connect().await.unwrap();
    let ctx = CloudContext::with_launcher(
        MasterConfig::default(),
        gateway,
        Arc::new(AcceptingLauncher::default()),
    )
    .unwrap();
    assert_eq!(timeout(Duration::from_secs(2), ctx.groups.load()).await.unwrap().unwrap(), 1);

    let group = ctx.groups.get("bedwars").unwrap();
    assert_eq!(group.max_online, 6);
    assert_eq!(group.memory, 512);
}
