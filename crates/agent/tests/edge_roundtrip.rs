use std::sync::Arc;

use agent::{AgentSettings, DirectoryClient, EdgeAgent, FixedMetric};
use directory::{DirectorySettings, PlacementDirectory};
use gateway::{
    GATEWAY_STAMP, GatewaySettings, LinkKind, RelayGateway, SessionRegistry, memory_link,
};
use proto::{AgentError, GatewayEndpoint, NodeId};
use tokio::sync::oneshot;
use tokio::time::{Duration, timeout};

fn pick_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

async fn wait_for_health(port: u16) {
    let url = format!("http://127.0.0.1:{port}/health");
    for _ in 0..80 {
        if let Ok(resp) = reqwest::get(&url).await
            && resp.status().is_success()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("service on port {port} did not become healthy in time");
}

async fn start_gateway() -> (u16, Arc<SessionRegistry>, oneshot::Sender<()>) {
    let port = pick_free_port();
    let gateway = RelayGateway::new(GatewaySettings {
        bind_addr: format!("127.0.0.1:{port}"),
        advertised: GatewayEndpoint {
            host: "127.0.0.1".to_string(),
            port: port.to_string(),
            downlink_path: "/v1.0/toedged".to_string(),
            uplink_path: "/v1.0/toedgeaccess".to_string(),
            biasync_path: "/v1.0/biasync".to_string(),
        },
        read_timeout: Some(Duration::from_secs(5)),
    });
    let registry = gateway.registry();
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = gateway
            .run(async {
                let _ = stopped.await;
            })
            .await;
    });
    wait_for_health(port).await;
    (port, registry, stop)
}

async fn start_directory(homes: Vec<String>) -> (u16, oneshot::Sender<()>) {
    let port = pick_free_port();
    let directory = PlacementDirectory::new(DirectorySettings {
        bind_addr: format!("127.0.0.1:{port}"),
        homes,
        heart_broken: Duration::from_secs(30),
        ping_interval: Duration::from_millis(100),
        probe_timeout: Duration::from_secs(2),
    })
    .expect("directory");
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = directory
            .run(async {
                let _ = stopped.await;
            })
            .await;
    });
    wait_for_health(port).await;
    (port, stop)
}

fn settings(node: &str, dir_port: u16) -> AgentSettings {
    AgentSettings {
        node_id: NodeId::from(node),
        project_id: "proj-1".to_string(),
        directory_url: format!("http://127.0.0.1:{dir_port}/v1.0/edgeaccess"),
        report_interval: Duration::from_millis(100),
        read_timeout: Some(Duration::from_secs(2)),
        retry_directory_interval: Duration::from_millis(100),
        retry_gateway_interval: Duration::from_millis(100),
    }
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..120 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn discovery_without_fresh_gateway_is_an_error() {
    let unreachable = format!("127.0.0.1:{}", pick_free_port());
    let (dir_port, _dir_stop) = start_directory(vec![unreachable]).await;

    let client = DirectoryClient::new(
        format!("http://127.0.0.1:{dir_port}/v1.0/edgeaccess"),
        NodeId::from("edge-0"),
        "proj-1",
    );
    let err = client
        .discover(&GatewayEndpoint::default())
        .await
        .expect_err("no gateway is fresh");
    match err {
        AgentError::Discovery(reason) => assert!(reason.contains("404"), "reason: {reason}"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn agent_reports_and_answers_pushes_through_assigned_gateway() {
    let (gw_port, registry, _gw_stop) = start_gateway().await;
    let (dir_port, _dir_stop) = start_directory(vec![format!("127.0.0.1:{gw_port}")]).await;

    let node = NodeId::from("edge-7");
    let agent = EdgeAgent::new(
        settings("edge-7", dir_port),
        Arc::new(FixedMetric("load1 0.10".to_string())),
    )
    .expect("agent settings");
    assert_eq!(agent.stamp(), "edge agent edge-7");
    let (agent_stop, agent_stopped) = oneshot::channel::<()>();
    let agent_task = tokio::spawn(agent.run(async {
        let _ = agent_stopped.await;
    }));

    wait_until("both links", || {
        registry.has_link(&node, LinkKind::Uplink) && registry.has_link(&node, LinkKind::Downlink)
    })
    .await;

    let mut reports = registry
        .subscribe(&node, LinkKind::Uplink)
        .expect("uplink queue");
    let report = timeout(Duration::from_secs(2), reports.recv())
        .await
        .expect("timed out waiting for report")
        .expect("uplink queue open");
    assert_eq!(report.body, "load1 0.10");
    assert!(report.reply.starts_with(&format!("touched by {GATEWAY_STAMP} at ")));

    let body = reqwest::get(format!(
        "http://127.0.0.1:{gw_port}/v1.0/ping2edged?edgenode_id=edge-7&msg=reboot"
    ))
    .await
    .expect("ping-through request")
    .text()
    .await
    .expect("ping-through body");
    assert!(body.starts_with("Reply from edge-7 is "), "body: {body}");
    assert!(body.contains("touched by edge agent edge-7"), "body: {body}");

    let _ = agent_stop.send(());
    agent_task.await.expect("agent task");
    wait_until("session teardown", || !registry.contains(&node)).await;
}

#[tokio::test]
async fn agent_returns_to_previous_gateway_after_link_fault() {
    let (a_port, a_registry, _a_stop) = start_gateway().await;
    let (b_port, b_registry, _b_stop) = start_gateway().await;
    let (dir_port, _dir_stop) = start_directory(vec![
        format!("127.0.0.1:{a_port}"),
        format!("127.0.0.1:{b_port}"),
    ])
    .await;

    let node = NodeId::from("edge-9");
    let agent = EdgeAgent::new(
        settings("edge-9", dir_port),
        Arc::new(FixedMetric("load1 0.20".to_string())),
    )
    .expect("agent settings");
    let (agent_stop, agent_stopped) = oneshot::channel::<()>();
    let agent_task = tokio::spawn(agent.run(async {
        let _ = agent_stopped.await;
    }));

    let fully_linked = |registry: &Arc<SessionRegistry>| {
        registry.has_link(&node, LinkKind::Uplink) && registry.has_link(&node, LinkKind::Downlink)
    };
    wait_until("agent links", || {
        fully_linked(&a_registry) || fully_linked(&b_registry)
    })
    .await;
    let (home, other, other_port) = if fully_linked(&a_registry) {
        (a_registry.clone(), b_registry.clone(), b_port)
    } else {
        (b_registry.clone(), a_registry.clone(), a_port)
    };

    // Extra session so the directory ranks the agent's gateway second.
    let (ballast, _ballast_peer) = memory_link(4);
    home.establish_downlink(NodeId::from("ballast"), ballast);

    let client = DirectoryClient::new(
        format!("http://127.0.0.1:{dir_port}/v1.0/edgeaccess"),
        NodeId::from("observer"),
        "proj-1",
    );
    let mut least_loaded = String::new();
    for _ in 0..80 {
        if let Ok(endpoint) = client.discover(&GatewayEndpoint::default()).await {
            least_loaded = endpoint.port;
            if least_loaded == other_port.to_string() {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(least_loaded, other_port.to_string(), "directory never saw the ballast");

    assert!(home.remove_session(&node));
    wait_until("reconnect", || {
        assert!(!other.contains(&node), "agent moved off its previous gateway");
        fully_linked(&home)
    })
    .await;
    assert!(!other.contains(&node));

    let _ = agent_stop.send(());
    agent_task.await.expect("agent task");
}
