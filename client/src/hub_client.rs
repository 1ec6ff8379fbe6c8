use crate::stream::StreamRenderer;
use gpctl_common::{ClusterSpecification, GpError, HubConfig, Result, ServiceStatus};
use gpctl_proto::{
    DialAgentsRequest, MakeClusterRequest, ProtoHubClient, StartAgentsRequest, StatusAgentsRequest,
    StopAgentsRequest, StopHubRequest,
};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};
use tracing::{info, instrument, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// The hub always runs on the host the command line is invoked from
const HUB_HOST: &str = "localhost";

/// gRPC client for the hub
#[derive(Debug, Clone)]
pub struct HubClient {
    client: ProtoHubClient<Channel>,
}

impl HubClient {
    pub async fn connect(config: &HubConfig) -> Result<Self> {
        let uri = format!("{}://{}:{}", config.credentials.scheme(), HUB_HOST, config.hub_port);
        let mut endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| GpError::Config {
                message: format!("invalid hub address {}: {}", uri, e),
            })?
            .connect_timeout(CONNECT_TIMEOUT);

        if let Some(tls) = config.credentials.load_client_tls()? {
            endpoint = endpoint
                .tls_config(tls.domain_name(HUB_HOST))
                .map_err(|e| GpError::Config {
                    message: format!("invalid hub TLS configuration: {}", e),
                })?;
        }

        let channel = endpoint.connect().await.map_err(|e| GpError::Connectivity {
            host: HUB_HOST.to_string(),
            message: format!("could not connect to hub on port {}: {}", config.hub_port, e),
        })?;

        info!("Connected to hub at {}", uri);
        Ok(Self::from_channel(channel))
    }

    pub fn from_channel(channel: Channel) -> Self {
        Self {
            client: ProtoHubClient::new(channel),
        }
    }

    /// Retry idempotent calls while the hub is unavailable
    async fn with_retry<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, Status>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(status) if status.code() == Code::Unavailable && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!("Hub request failed, retrying (attempt {}/{}): {}", attempt, MAX_RETRIES, status.message());
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(status) => return Err(hub_error(status)),
            }
        }
    }

    /// Run MakeCluster, rendering its progress until the hub finishes.
    ///
    /// Never retried: a partially created cluster needs `force` to re-run.
    #[instrument(skip(self, spec, renderer))]
    pub async fn make_cluster(&self, spec: &ClusterSpecification, renderer: &mut StreamRenderer) -> Result<()> {
        let stream = self
            .client
            .clone()
            .make_cluster(Request::new(MakeClusterRequest::from(spec)))
            .await
            .map_err(hub_error)?
            .into_inner();

        renderer.consume(stream).await
    }

    #[instrument(skip(self))]
    pub async fn start_agents(&self) -> Result<()> {
        self.client
            .clone()
            .start_agents(Request::new(StartAgentsRequest {}))
            .await
            .map_err(hub_error)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn dial_agents(&self) -> Result<()> {
        self.with_retry(|| async {
            let mut client = self.client.clone();
            client.dial_agents(Request::new(DialAgentsRequest {})).await
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn status_agents(&self) -> Result<Vec<ServiceStatus>> {
        let reply = self
            .with_retry(|| async {
                let mut client = self.client.clone();
                client.status_agents(Request::new(StatusAgentsRequest {})).await
            })
            .await?
            .into_inner();

        Ok(reply.statuses.into_iter().map(ServiceStatus::from).collect())
    }

    #[instrument(skip(self))]
    pub async fn stop_agents(&self) -> Result<()> {
        self.client
            .clone()
            .stop_agents(Request::new(StopAgentsRequest {}))
            .await
            .map_err(hub_error)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stop_hub(&self) -> Result<()> {
        self.client
            .clone()
            .stop(Request::new(StopHubRequest {}))
            .await
            .map_err(hub_error)?;
        Ok(())
    }
}

/// The hub already formats its errors; keep its text as is
fn hub_error(status: Status) -> GpError {
    GpError::remote("hub", status.message())
}

/// One line per agent, as printed by `gp status agents`
pub fn format_statuses(statuses: &[ServiceStatus]) -> String {
    let mut out = format!("{:<20}{:<12}{:<12}{}\n", "HOST", "STATUS", "UPTIME", "PID");
    for status in statuses {
        out.push_str(&format!(
            "{:<20}{:<12}{:<12}{}\n",
            status.host, status.status, status.uptime, status.pid
        ));
    }
    out
}
