use gpctl_common::{Credentials, GpError, Result, ServiceStatus};
use gpctl_proto::{
    status_to_error, MakeSegmentRequest, ProtoAgentClient, StartSegmentRequest, StatusAgentRequest,
    StopAgentRequest, StopSegmentRequest, ValidateHostEnvRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;
use tracing::{debug, instrument};

/// Upper bound for establishing a connection to one agent
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// Upper bound for a connection to report readiness
pub const READY_TIMEOUT: Duration = Duration::from_secs(3);

/// Operations the hub issues against a single agent
#[async_trait::async_trait]
pub trait AgentClient: Send + Sync {
    async fn validate_host_env(&self, directories: Vec<String>, forced: bool) -> Result<()>;

    async fn make_segment(&self, request: MakeSegmentRequest) -> Result<()>;

    async fn start_segment(&self, request: StartSegmentRequest) -> Result<()>;

    async fn stop_segment(&self, request: StopSegmentRequest) -> Result<()>;

    /// Service status; the host field is left for the caller to fill in
    async fn status(&self) -> Result<ServiceStatus>;

    async fn stop(&self) -> Result<()>;

    /// Fails when the underlying transport cannot take requests
    async fn ready(&self) -> Result<()>;
}

/// Opens connections to agents
#[async_trait::async_trait]
pub trait AgentDialer: Send + Sync {
    async fn dial(&self, host: &str) -> Result<Arc<dyn AgentClient>>;
}

/// [`AgentClient`] over a tonic channel
#[derive(Clone)]
pub struct GrpcAgentClient {
    host: String,
    channel: Channel,
    client: ProtoAgentClient<Channel>,
}

impl GrpcAgentClient {
    pub fn new(host: impl Into<String>, channel: Channel) -> Self {
        Self {
            host: host.into(),
            client: ProtoAgentClient::new(channel.clone()),
            channel,
        }
    }

    fn error(&self, status: tonic::Status) -> GpError {
        status_to_error(&self.host, status)
    }
}

#[async_trait::async_trait]
impl AgentClient for GrpcAgentClient {
    #[instrument(skip(self))]
    async fn validate_host_env(&self, directories: Vec<String>, forced: bool) -> Result<()> {
        let request = ValidateHostEnvRequest {
            directory_list: directories,
            forced,
        };
        self.client
            .clone()
            .validate_host_env(Request::new(request))
            .await
            .map_err(|s| self.error(s))?;
        Ok(())
    }

    #[instrument(skip(self, request))]
    async fn make_segment(&self, request: MakeSegmentRequest) -> Result<()> {
        self.client
            .clone()
            .make_segment(Request::new(request))
            .await
            .map_err(|s| self.error(s))?;
        Ok(())
    }

    #[instrument(skip(self, request))]
    async fn start_segment(&self, request: StartSegmentRequest) -> Result<()> {
        self.client
            .clone()
            .start_segment(Request::new(request))
            .await
            .map_err(|s| self.error(s))?;
        Ok(())
    }

    #[instrument(skip(self, request))]
    async fn stop_segment(&self, request: StopSegmentRequest) -> Result<()> {
        self.client
            .clone()
            .stop_segment(Request::new(request))
            .await
            .map_err(|s| self.error(s))?;
        Ok(())
    }

    async fn status(&self) -> Result<ServiceStatus> {
        let reply = self
            .client
            .clone()
            .status(Request::new(StatusAgentRequest {}))
            .await
            .map_err(|s| self.error(s))?
            .into_inner();

        Ok(ServiceStatus {
            host: self.host.clone(),
            status: reply.status,
            uptime: reply.uptime,
            pid: reply.pid,
        })
    }

    async fn stop(&self) -> Result<()> {
        self.client
            .clone()
            .stop(Request::new(StopAgentRequest {}))
            .await
            .map_err(|s| self.error(s))?;
        Ok(())
    }

    async fn ready(&self) -> Result<()> {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        match tokio::time::timeout(READY_TIMEOUT, grpc.ready()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(GpError::Connectivity {
                host: self.host.clone(),
                message: e.to_string(),
            }),
            Err(_) => Err(GpError::Connectivity {
                host: self.host.clone(),
                message: "timed out waiting for the connection to become ready".to_string(),
            }),
        }
    }
}

/// Dials agents over gRPC on a fixed port
#[derive(Debug, Clone)]
pub struct GrpcDialer {
    port: u16,
    credentials: Credentials,
}

impl GrpcDialer {
    pub fn new(port: u16, credentials: Credentials) -> Self {
        Self { port, credentials }
    }
}

#[async_trait::async_trait]
impl AgentDialer for GrpcDialer {
    async fn dial(&self, host: &str) -> Result<Arc<dyn AgentClient>> {
        let connectivity = |message: String| GpError::Connectivity {
            host: host.to_string(),
            message,
        };

        let uri = format!("{}://{}:{}", self.credentials.scheme(), host, self.port);
        let mut endpoint = Endpoint::from_shared(uri)
            .map_err(|e| connectivity(format!("invalid endpoint: {}", e)))?
            .connect_timeout(DIAL_TIMEOUT);

        if let Some(tls) = self.credentials.load_client_tls()? {
            endpoint = endpoint
                .tls_config(tls.domain_name(host))
                .map_err(|e| connectivity(format!("invalid TLS configuration: {}", e)))?;
        }

        let channel = tokio::time::timeout(DIAL_TIMEOUT, endpoint.connect())
            .await
            .map_err(|_| connectivity("timed out".to_string()))?
            .map_err(|e| connectivity(e.to_string()))?;

        debug!("Connected to agent on {}:{}", host, self.port);
        Ok(Arc::new(GrpcAgentClient::new(host, channel)))
    }
}
