use crate::fanout::execute_rpc;
use crate::pool::ConnectionPool;
use crate::stream::EventSink;
use gpctl_common::{ClusterSpecification, GpError, ProgressEvent, Result};
use tracing::info;

pub const VALIDATING_HOSTS: &str = "Validating hosts";

/// Ask every host to check that it can receive its segments.
///
/// Each host gets the full list of data directories it will own. Any host
/// failing fails the whole gate.
pub async fn validate_environment(
    pool: &ConnectionPool,
    spec: &ClusterSpecification,
    sink: &dyn EventSink,
) -> Result<()> {
    let host_dirs = spec.host_directories();
    let hosts: Vec<String> = host_dirs.keys().cloned().collect();
    let connections = pool.connections_for(&hosts).await?;

    info!("Validating environment on {} hosts", hosts.len());
    sink.send(ProgressEvent::progress_init(VALIDATING_HOSTS, hosts.len() as u32)).await;

    let host_dirs = &host_dirs;
    let forced = spec.force;
    execute_rpc(&connections, move |conn| async move {
        let dirs = host_dirs.get(&conn.hostname).cloned().unwrap_or_default();
        conn.client.validate_host_env(dirs, forced).await?;
        sink.send(ProgressEvent::progress_increment(VALIDATING_HOSTS)).await;
        Ok::<(), GpError>(())
    })
    .await?;

    Ok(())
}
