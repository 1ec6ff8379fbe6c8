use crate::agent::{AgentClient, AgentDialer};
use futures::future::join_all;
use gpctl_common::{GpError, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// An established connection to the agent on one host
pub struct Connection {
    pub hostname: String,
    pub client: Arc<dyn AgentClient>,
    cancel: CancellationToken,
}

impl Connection {
    pub fn new(hostname: impl Into<String>, client: Arc<dyn AgentClient>) -> Self {
        Self {
            hostname: hostname.into(),
            client,
            cancel: CancellationToken::new(),
        }
    }

    /// Resolves once the connection has been torn down
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("hostname", &self.hostname)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Agent connections held by the hub, reused across calls
pub struct ConnectionPool {
    dialer: Arc<dyn AgentDialer>,
    connections: Mutex<Vec<Arc<Connection>>>,
}

impl ConnectionPool {
    pub fn new(dialer: Arc<dyn AgentDialer>) -> Self {
        Self {
            dialer,
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Make sure every host in `hosts` has a ready connection.
    ///
    /// Hosts without a connection are dialed concurrently. Connections that
    /// succeed are kept even when other hosts fail, so a later call only
    /// dials what is still missing. Existing connections are only checked
    /// for readiness.
    pub async fn ensure_connections(&self, hosts: &[String]) -> Result<Vec<Arc<Connection>>> {
        let mut connections = self.connections.lock().await;

        let mut missing: Vec<&str> = Vec::new();
        for host in hosts {
            let known = connections.iter().any(|c| &c.hostname == host);
            if !known && !missing.contains(&host.as_str()) {
                missing.push(host);
            }
        }

        if !missing.is_empty() {
            info!("Dialing agents on {} hosts", missing.len());
            let dials = missing.iter().map(|host| async move { (*host, self.dialer.dial(host).await) });

            let mut unreachable = Vec::new();
            for (host, result) in join_all(dials).await {
                match result {
                    Ok(client) => connections.push(Arc::new(Connection::new(host, client))),
                    Err(e) => {
                        error!("Could not connect to agent on {}: {}", host, e);
                        unreachable.push(host.to_string());
                    }
                }
            }

            if !unreachable.is_empty() {
                return Err(GpError::UnreachableHosts { hosts: unreachable });
            }
        }

        let selected = select(&connections, hosts)?;
        drop(connections);

        ensure_ready(&selected).await?;
        Ok(selected)
    }

    /// Existing connections for `hosts`, in the order given
    pub async fn connections_for(&self, hosts: &[String]) -> Result<Vec<Arc<Connection>>> {
        let connections = self.connections.lock().await;
        select(&connections, hosts)
    }

    /// Every connection currently held
    pub async fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().await.clone()
    }

    pub async fn hosts(&self) -> Vec<String> {
        self.connections
            .lock()
            .await
            .iter()
            .map(|c| c.hostname.clone())
            .collect()
    }

    /// Tear down and forget every connection
    pub async fn disconnect_all(&self) {
        let mut connections = self.connections.lock().await;
        for conn in connections.drain(..) {
            conn.close();
        }
    }
}

fn select(connections: &[Arc<Connection>], hosts: &[String]) -> Result<Vec<Arc<Connection>>> {
    let mut selected: Vec<Arc<Connection>> = Vec::new();
    for host in hosts {
        if selected.iter().any(|c| &c.hostname == host) {
            continue;
        }
        let conn = connections
            .iter()
            .find(|c| &c.hostname == host)
            .ok_or_else(|| GpError::Connectivity {
                host: host.clone(),
                message: "no connection to agent".to_string(),
            })?;
        selected.push(conn.clone());
    }
    Ok(selected)
}

/// Fail with every host whose connection is not ready
pub async fn ensure_ready(connections: &[Arc<Connection>]) -> Result<()> {
    let checks = connections
        .iter()
        .map(|conn| async move { (conn.hostname.as_str(), conn.client.ready().await) });

    let unready: Vec<String> = join_all(checks)
        .await
        .into_iter()
        .filter_map(|(host, result)| match result {
            Ok(()) => None,
            Err(e) => {
                error!("Connection to {} is not ready: {}", host, e);
                Some(host.to_string())
            }
        })
        .collect();

    if unready.is_empty() {
        Ok(())
    } else {
        Err(GpError::UnreadyHosts { hosts: unready })
    }
}
