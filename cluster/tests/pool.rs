mod common;

use common::*;
use gpctl_cluster::{execute_rpc, join_all_errors, ConnectionPool};
use gpctl_common::{GpError, SegmentDescriptor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn hosts(names: &[&str]) -> Vec<String> {
    names.iter().map(|h| h.to_string()).collect()
}

#[tokio::test]
async fn test_every_unreachable_host_is_named() {
    let dialer = FakeDialer::with_hosts(&["cdw", "sdw1", "sdw2", "sdw3"]);
    dialer.set_unreachable("sdw1", true);
    dialer.set_unreachable("sdw3", true);
    let pool = ConnectionPool::new(dialer.clone());

    let err = pool
        .ensure_connections(&hosts(&["cdw", "sdw1", "sdw2", "sdw3"]))
        .await
        .unwrap_err();

    match err {
        GpError::UnreachableHosts { hosts } => assert_eq!(hosts, vec!["sdw1", "sdw3"]),
        other => panic!("unexpected error: {other}"),
    }

    // The good connections survive the failure
    let mut kept = pool.hosts().await;
    kept.sort();
    assert_eq!(kept, vec!["cdw", "sdw2"]);
}

#[tokio::test]
async fn test_second_call_only_dials_missing_hosts() {
    let dialer = FakeDialer::with_hosts(&["cdw", "sdw1"]);
    dialer.set_unreachable("sdw1", true);
    let pool = ConnectionPool::new(dialer.clone());
    let all = hosts(&["cdw", "sdw1"]);

    assert!(pool.ensure_connections(&all).await.is_err());

    dialer.set_unreachable("sdw1", false);
    let conns = pool.ensure_connections(&all).await.unwrap();
    assert_eq!(conns.len(), 2);
    assert_eq!(conns[0].hostname, "cdw");
    assert_eq!(conns[1].hostname, "sdw1");

    pool.ensure_connections(&all).await.unwrap();
    assert_eq!(dialer.dial_count("cdw"), 1);
    assert_eq!(dialer.dial_count("sdw1"), 2);
}

#[tokio::test]
async fn test_duplicate_hosts_are_dialed_once() {
    let dialer = FakeDialer::with_hosts(&["sdw1"]);
    let pool = ConnectionPool::new(dialer.clone());

    let conns = pool.ensure_connections(&hosts(&["sdw1", "sdw1"])).await.unwrap();

    assert_eq!(conns.len(), 1);
    assert_eq!(dialer.dial_count("sdw1"), 1);
}

#[tokio::test]
async fn test_unready_connections_fail_fast() {
    let dialer = FakeDialer::with_hosts(&["cdw", "sdw1", "sdw2"]);
    *dialer.agent("sdw1").unready.lock() = true;
    *dialer.agent("sdw2").unready.lock() = true;
    let pool = ConnectionPool::new(dialer.clone());

    let err = pool
        .ensure_connections(&hosts(&["cdw", "sdw1", "sdw2"]))
        .await
        .unwrap_err();

    assert!(matches!(&err, GpError::UnreadyHosts { hosts } if hosts.len() == 2));
    assert_eq!(err.hosts(), vec!["sdw1", "sdw2"]);
}

#[tokio::test]
async fn test_connections_for_unknown_host() {
    let pool = ConnectionPool::new(FakeDialer::with_hosts(&["cdw"]));
    let err = pool.connections_for(&hosts(&["cdw"])).await.unwrap_err();
    assert!(matches!(err, GpError::Connectivity { ref host, .. } if host == "cdw"));
}

#[tokio::test]
async fn test_execute_rpc_collects_every_failure() {
    let names = ["sdw1", "sdw2", "sdw3", "sdw4", "sdw5"];
    let pool = ConnectionPool::new(FakeDialer::with_hosts(&names));
    let conns = pool.ensure_connections(&hosts(&names)).await.unwrap();
    let calls = AtomicUsize::new(0);

    let calls_ref = &calls;
    let err = execute_rpc(&conns, move |conn| async move {
        calls_ref.fetch_add(1, Ordering::SeqCst);
        if conn.hostname == "sdw2" || conn.hostname == "sdw5" {
            return Err(GpError::remote(&conn.hostname, "initdb failed"));
        }
        Ok(())
    })
    .await
    .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(err.len(), 2);
    assert_eq!(err.hosts(), vec!["sdw2", "sdw5"]);
}

#[tokio::test]
async fn test_execute_rpc_succeeds_when_nothing_fails() {
    let names = ["sdw1", "sdw2"];
    let pool = ConnectionPool::new(FakeDialer::with_hosts(&names));
    let conns = pool.ensure_connections(&hosts(&names)).await.unwrap();

    let result = execute_rpc(&conns, |conn| async move { conn.client.status().await.map(|_| ()) }).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_closing_the_pool_fails_inflight_calls() {
    let dialer = FakeDialer::with_hosts(&["sdw1", "sdw2"]);
    *dialer.agent("sdw2").hang_status.lock() = true;
    let pool = ConnectionPool::new(dialer.clone());
    let conns = pool.ensure_connections(&hosts(&["sdw1", "sdw2"])).await.unwrap();

    let (result, ()) = tokio::join!(
        execute_rpc(&conns, |conn| async move { conn.client.status().await.map(|_| ()) }),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pool.disconnect_all().await;
        }
    );

    let err = result.unwrap_err();
    assert_eq!(err.hosts(), vec!["sdw2"]);
    assert!(matches!(err.failures[0].error, GpError::Connectivity { .. }));
    assert!(conns.iter().all(|c| c.is_closed()));
    assert!(pool.connections().await.is_empty());
}

#[tokio::test]
async fn test_join_all_errors_keeps_keys() {
    let segments = vec![
        SegmentDescriptor::new("sdw1", "sdw1", 7002, "/data/p0"),
        SegmentDescriptor::new("sdw1", "sdw1", 7003, "/data/p1"),
    ];

    let tasks = segments.iter().map(|seg| {
        let key = format!("{}:{}", seg.hostname, seg.data_directory);
        let fail = seg.port == 7003;
        (key, async move {
            if fail {
                Err(GpError::remote("sdw1", "port in use"))
            } else {
                Ok(())
            }
        })
    });

    let err = join_all_errors(tasks).await.unwrap_err();
    assert_eq!(err.failures.len(), 1);
    assert_eq!(err.failures[0].host, "sdw1:/data/p1");
}

#[tokio::test]
async fn test_provisioner_starts_every_segment() {
    let dialer = FakeDialer::with_hosts(&["sdw1", "sdw2"]);
    let pool = Arc::new(ConnectionPool::new(dialer.clone()));
    pool.ensure_connections(&hosts(&["sdw1", "sdw2"])).await.unwrap();

    let segments = vec![
        SegmentDescriptor::new("sdw1", "sdw1", 7002, "/data/p0"),
        SegmentDescriptor::new("sdw2", "sdw2", 7002, "/data/p1"),
        SegmentDescriptor::new("sdw1", "sdw1", 7003, "/data/p2"),
    ];
    gpctl_cluster::provisioner::start_segments(&pool, &segments, "")
        .await
        .unwrap();

    let sdw1 = dialer.agent("sdw1");
    let started = sdw1.started.lock();
    assert_eq!(started.len(), 2);
    assert!(started.iter().all(|r| r.wait && r.timeout == 600));
    assert_eq!(dialer.agent("sdw2").started.lock().len(), 1);
}
