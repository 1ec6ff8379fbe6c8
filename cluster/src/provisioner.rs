use crate::fanout::{execute_rpc, join_all_errors};
use crate::pool::ConnectionPool;
use crate::stream::EventSink;
use gpctl_common::{
    ClusterParams, GpError, ProgressEvent, Result, SegmentDescriptor, COORDINATOR_CONTENT_ID, COORDINATOR_DBID,
    SEGMENT_START_TIMEOUT_SECS, UTILITY_MODE_OPTIONS,
};
use gpctl_proto::{Locale, MakeSegmentRequest, Segment, StartSegmentRequest};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use tracing::info;

pub const INITIALIZING_SEGMENTS: &str = "Initializing segments";

/// `common` overlaid with `specific`; keys in `specific` win
pub fn merge_config(
    common: &HashMap<String, String>,
    specific: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = common.clone();
    merged.extend(specific.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Entries primaries add to pg_hba.conf so the coordinator can reach them
pub fn coordinator_hba_addresses(coordinator: &SegmentDescriptor, hba_hostnames: bool) -> Vec<String> {
    if hba_hostnames {
        return vec![coordinator.hostname.clone()];
    }
    match coordinator.address.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => vec![format!("{}/32", ip)],
        Ok(IpAddr::V6(ip)) => vec![format!("{}/128", ip)],
        Err(_) => vec![coordinator.address.clone()],
    }
}

pub fn make_segment_request(
    segment: &SegmentDescriptor,
    params: &ClusterParams,
    config: HashMap<String, String>,
    coordinator_addresses: &[String],
) -> MakeSegmentRequest {
    MakeSegmentRequest {
        segment: Some(Segment::from(segment)),
        locale: Some(Locale::from(&params.locale)),
        encoding: params.encoding.clone(),
        seg_config: config,
        coordinator_addresses: coordinator_addresses.to_vec(),
        hba_hostnames: params.hba_hostnames,
        data_checksums: params.data_checksums,
    }
}

fn group_by_host(segments: &[SegmentDescriptor]) -> BTreeMap<String, Vec<SegmentDescriptor>> {
    let mut by_host: BTreeMap<String, Vec<SegmentDescriptor>> = BTreeMap::new();
    for seg in segments {
        by_host.entry(seg.hostname.clone()).or_default().push(seg.clone());
    }
    by_host
}

/// Create the coordinator and start it in utility mode.
///
/// Content id and dbid are forced to the coordinator's reserved values,
/// whatever the request carried.
pub async fn create_and_start_coordinator(
    pool: &ConnectionPool,
    coordinator: &SegmentDescriptor,
    params: &ClusterParams,
) -> Result<()> {
    let mut coordinator = coordinator.clone();
    coordinator.content_id = COORDINATOR_CONTENT_ID;
    coordinator.dbid = COORDINATOR_DBID;

    let connections = pool.connections_for(&[coordinator.hostname.clone()]).await?;
    let config = merge_config(&params.common_config, &params.coordinator_config);

    info!(
        "Creating coordinator on {} in {}",
        coordinator.hostname, coordinator.data_directory
    );

    let coordinator = &coordinator;
    let config = &config;
    execute_rpc(&connections, move |conn| async move {
        let request = make_segment_request(coordinator, params, config.clone(), &[]);
        conn.client.make_segment(request).await?;

        conn.client
            .start_segment(StartSegmentRequest {
                data_dir: coordinator.data_directory.clone(),
                wait: true,
                timeout: 0,
                options: UTILITY_MODE_OPTIONS.to_string(),
            })
            .await
    })
    .await?;

    Ok(())
}

/// Create every primary in `segments`, concurrently across and within hosts.
///
/// The primaries are left stopped. A failing segment does not stop its
/// siblings; all failures are reported together.
pub async fn create_segments(
    pool: &ConnectionPool,
    segments: &[SegmentDescriptor],
    params: &ClusterParams,
    coordinator_addresses: &[String],
    sink: &dyn EventSink,
) -> Result<()> {
    let by_host = group_by_host(segments);
    let hosts: Vec<String> = by_host.keys().cloned().collect();
    let connections = pool.connections_for(&hosts).await?;
    let config = merge_config(&params.common_config, &params.segment_config);

    info!("Creating {} primary segments on {} hosts", segments.len(), hosts.len());
    sink.send(ProgressEvent::progress_init(INITIALIZING_SEGMENTS, segments.len() as u32)).await;

    let by_host = &by_host;
    let config = &config;
    execute_rpc(&connections, move |conn| async move {
        let host_segments = by_host.get(&conn.hostname).map(Vec::as_slice).unwrap_or_default();

        let tasks = host_segments.iter().map(|seg| {
            let conn = conn.clone();
            let request = make_segment_request(seg, params, config.clone(), coordinator_addresses);
            let key = format!("{}:{}", conn.hostname, seg.data_directory);
            (key, async move {
                conn.client.make_segment(request).await?;
                sink.send(ProgressEvent::progress_increment(INITIALIZING_SEGMENTS)).await;
                Ok::<(), GpError>(())
            })
        });

        join_all_errors(tasks).await?;
        Ok::<(), GpError>(())
    })
    .await?;

    Ok(())
}

/// Start every segment in `segments` with the given server options
pub async fn start_segments(pool: &ConnectionPool, segments: &[SegmentDescriptor], options: &str) -> Result<()> {
    let by_host = group_by_host(segments);
    let hosts: Vec<String> = by_host.keys().cloned().collect();
    let connections = pool.connections_for(&hosts).await?;

    let by_host = &by_host;
    execute_rpc(&connections, move |conn| async move {
        let host_segments = by_host.get(&conn.hostname).map(Vec::as_slice).unwrap_or_default();

        let tasks = host_segments.iter().map(|seg| {
            let conn = conn.clone();
            let request = StartSegmentRequest {
                data_dir: seg.data_directory.clone(),
                wait: true,
                timeout: SEGMENT_START_TIMEOUT_SECS,
                options: options.to_string(),
            };
            let key = format!("{}:{}", conn.hostname, seg.data_directory);
            (key, async move { conn.client.start_segment(request).await })
        });

        join_all_errors(tasks).await?;
        Ok::<(), GpError>(())
    })
    .await?;

    Ok(())
}
