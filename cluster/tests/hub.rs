mod common;

use common::*;
use gpctl_cluster::{ConnectionPool, HubService};
use gpctl_common::{GpError, HubConfig, ProgressEvent};
use gpctl_proto::{Hub, MakeClusterRequest, StatusAgentsRequest, StopHubRequest};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tonic::{Code, Request};

struct HubHarness {
    dialer: Arc<FakeDialer>,
    runner: Arc<FakeRunner>,
    pool: Arc<ConnectionPool>,
    hub: HubService,
}

fn hub() -> HubHarness {
    let dialer = FakeDialer::with_hosts(&["cdw", "sdw1", "sdw2"]);
    let runner = FakeRunner::with_output(&["started\n"]);
    let pool = Arc::new(ConnectionPool::new(dialer.clone()));

    let mut config = HubConfig::new("/usr/local/gpdb", vec!["cdw".into(), "sdw1".into(), "sdw2".into()]);
    config.superuser = Some("gpadmin".to_string());

    let hub = HubService::new(
        config,
        "/usr/local/gpdb/gp.conf",
        pool.clone(),
        Arc::new(FakeCatalog::default()),
        runner.clone(),
    )
    .unwrap();

    HubHarness {
        dialer,
        runner,
        pool,
        hub,
    }
}

#[tokio::test]
async fn test_launch_agents_runs_gpssh_on_every_host() {
    let h = hub();
    h.hub.launch_agents().await.unwrap();

    let commands = h.runner.commands.lock();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].name(), "gpssh");
    assert_eq!(
        commands[0].args,
        vec![
            "-h",
            "cdw",
            "-h",
            "sdw1",
            "-h",
            "sdw2",
            "nohup /usr/local/gpdb/bin/gp agent --config-file /usr/local/gpdb/gp.conf > /tmp/gp_agent.log 2>&1 &",
        ]
    );
}

#[tokio::test]
async fn test_status_agents_follow_host_order() {
    let h = hub();
    let reply = h
        .hub
        .status_agents(Request::new(StatusAgentsRequest {}))
        .await
        .unwrap()
        .into_inner();

    let hosts: Vec<&str> = reply.statuses.iter().map(|s| s.host.as_str()).collect();
    assert_eq!(hosts, vec!["cdw", "sdw1", "sdw2"]);
    assert!(reply.statuses.iter().all(|s| s.status == "running"));
}

#[tokio::test]
async fn test_stop_agents_accepts_replies_and_vanished_agents() {
    let h = hub();
    *h.dialer.agent("sdw1").stop_behavior.lock() = StopBehavior::Vanish;
    h.hub.connect_agents().await.unwrap();
    let conns = h.pool.connections().await;

    h.hub.shutdown_agents().await.unwrap();

    assert!(h.pool.connections().await.is_empty());
    assert!(conns.iter().all(|c| c.is_closed()));
}

#[tokio::test]
async fn test_stop_agents_reports_refusal() {
    let h = hub();
    *h.dialer.agent("sdw2").stop_behavior.lock() = StopBehavior::Refuse;

    let err = h.hub.shutdown_agents().await.unwrap_err();

    assert_eq!(err.hosts(), vec!["sdw2"]);
    assert!(matches!(err, GpError::Fanout(_)));
    assert!(h.pool.connections().await.is_empty());
}

#[tokio::test]
async fn test_stop_agents_with_unreachable_host_stops_the_rest() {
    let h = hub();
    h.dialer.set_unreachable("sdw1", true);
    *h.dialer.agent("sdw2").stop_behavior.lock() = StopBehavior::Refuse;

    let err = h.hub.shutdown_agents().await.unwrap_err();

    assert!(matches!(err, GpError::Fanout(_)));
    assert_eq!(err.hosts(), vec!["sdw2"]);
    assert_eq!(h.dialer.agent("cdw").stop_count(), 1);
    assert_eq!(h.dialer.agent("sdw2").stop_count(), 1);
    assert_eq!(h.dialer.agent("sdw1").stop_count(), 0);
    assert!(h.pool.connections().await.is_empty());
}

#[tokio::test]
async fn test_stop_agents_counts_unreachable_hosts_as_stopped() {
    let h = hub();
    h.dialer.set_unreachable("sdw1", true);

    h.hub.shutdown_agents().await.unwrap();

    assert_eq!(h.dialer.agent("cdw").stop_count(), 1);
    assert_eq!(h.dialer.agent("sdw2").stop_count(), 1);
    assert!(h.pool.connections().await.is_empty());
}

#[tokio::test]
async fn test_stop_agents_skips_unready_connections() {
    let h = hub();
    h.hub.connect_agents().await.unwrap();
    let conns = h.pool.connections().await;
    *h.dialer.agent("cdw").unready.lock() = true;

    h.hub.shutdown_agents().await.unwrap();

    assert_eq!(h.dialer.agent("cdw").stop_count(), 0);
    assert_eq!(h.dialer.agent("sdw1").stop_count(), 1);
    assert!(conns.iter().all(|c| c.is_closed()));
    assert!(h.pool.connections().await.is_empty());
}

#[tokio::test]
async fn test_stop_hub_cancels_serving() {
    let h = hub();
    let token = h.hub.shutdown_token();
    assert!(!token.is_cancelled());

    h.hub.stop(Request::new(StopHubRequest {})).await.unwrap();
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn test_make_cluster_streams_to_completion() {
    let h = hub();
    let request = MakeClusterRequest::from(&two_host_spec());

    let mut stream = h.hub.make_cluster(Request::new(request)).await.unwrap().into_inner();

    let mut events = Vec::new();
    while let Some(reply) = stream.next().await {
        events.push(ProgressEvent::try_from(reply.unwrap()).unwrap());
    }

    assert_eq!(events.last(), Some(&ProgressEvent::log("Cluster created")));
    assert!(events.contains(&ProgressEvent::Stdout("started\n".to_string())));
}

#[tokio::test]
async fn test_make_cluster_failure_ends_stream_with_status() {
    let h = hub();
    h.dialer.set_unreachable("sdw1", true);
    let request = MakeClusterRequest::from(&two_host_spec());

    let mut stream = h.hub.make_cluster(Request::new(request)).await.unwrap().into_inner();

    let mut last_log = None;
    let mut status = None;
    while let Some(reply) = stream.next().await {
        match reply {
            Ok(reply) => {
                if let ProgressEvent::Log(msg) = ProgressEvent::try_from(reply).unwrap() {
                    last_log = Some(msg);
                }
            }
            Err(s) => status = Some(s),
        }
    }

    let status = status.unwrap();
    assert_eq!(status.code(), Code::Unavailable);
    assert!(status.message().contains("sdw1"));
    assert!(last_log.unwrap().starts_with("error:"));
}

#[tokio::test]
async fn test_make_cluster_rejects_invalid_request() {
    let h = hub();
    let mut spec = two_host_spec();
    spec.primaries.clear();

    let mut stream = h
        .hub
        .make_cluster(Request::new(MakeClusterRequest::from(&spec)))
        .await
        .unwrap()
        .into_inner();

    let first = ProgressEvent::try_from(stream.next().await.unwrap().unwrap()).unwrap();
    match first {
        ProgressEvent::Log(msg) => assert!(msg.starts_with("error: invalid cluster specification")),
        other => panic!("unexpected event: {other:?}"),
    }
    let status = stream.next().await.unwrap().unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(stream.next().await.is_none());
    assert!(h.dialer.dials.lock().is_empty());
}

#[tokio::test]
async fn test_make_cluster_streams_malformed_request_error() {
    let h = hub();
    let mut request = MakeClusterRequest::from(&two_host_spec());
    request.coordinator = None;

    let mut stream = h.hub.make_cluster(Request::new(request)).await.unwrap().into_inner();

    let first = ProgressEvent::try_from(stream.next().await.unwrap().unwrap()).unwrap();
    assert_eq!(first, ProgressEvent::Log("error: invalid cluster specification: request has no coordinator segment".to_string()));
    let status = stream.next().await.unwrap().unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}
