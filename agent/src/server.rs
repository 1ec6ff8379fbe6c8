use crate::segment::{SegmentManager, SegmentRequest};
use crate::system::HostSystem;
use crate::validate::validate_host_env;
use gpctl_common::{AgentConfig, CommandRunner, GpError, Locale, Result, SegmentDescriptor};
use gpctl_proto::{
    error_to_status, Agent, AgentServer, MakeSegmentReply, MakeSegmentRequest, StartSegmentReply,
    StartSegmentRequest, StatusAgentReply, StatusAgentRequest, StopAgentReply, StopAgentRequest,
    StopSegmentReply, StopSegmentRequest, ValidateHostEnvReply, ValidateHostEnvRequest,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{error, info, instrument};

/// gRPC front of the agent running on one host
pub struct AgentService {
    config: AgentConfig,
    segments: SegmentManager,
    system: Arc<dyn HostSystem>,
    shutdown: CancellationToken,
    started: Instant,
}

impl AgentService {
    pub fn new(config: AgentConfig, runner: Arc<dyn CommandRunner>, system: Arc<dyn HostSystem>) -> Self {
        let segments = SegmentManager::new(config.gphome.clone(), runner, system.clone());
        Self {
            config,
            segments,
            system,
            shutdown: CancellationToken::new(),
            started: Instant::now(),
        }
    }

    /// Token cancelled when the agent is asked to stop
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until a `Stop` RPC arrives or the token is cancelled
    pub async fn serve(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.agent_port));
        let shutdown = self.shutdown.clone();

        let mut builder = tonic::transport::Server::builder();
        if let Some(tls) = self.config.credentials.load_server_tls()? {
            builder = builder.tls_config(tls).map_err(|e| GpError::Config {
                message: format!("invalid agent TLS configuration: {}", e),
            })?;
        }

        info!("Agent listening on {}", addr);
        builder
            .add_service(AgentServer::new(self))
            .serve_with_shutdown(addr, async move { shutdown.cancelled().await })
            .await
            .map_err(|e| GpError::internal(format!("agent server failed: {}", e)))?;

        info!("Agent stopped");
        Ok(())
    }

    fn uptime(&self) -> String {
        format!("{}s", self.started.elapsed().as_secs())
    }
}

fn to_status(err: GpError) -> Status {
    error!("{}", err);
    error_to_status(&err)
}

#[tonic::async_trait]
impl Agent for AgentService {
    #[instrument(skip(self))]
    async fn validate_host_env(
        &self,
        request: Request<ValidateHostEnvRequest>,
    ) -> std::result::Result<Response<ValidateHostEnvReply>, Status> {
        let request = request.into_inner();
        validate_host_env(
            self.system.as_ref(),
            &self.config.gphome,
            &request.directory_list,
            request.forced,
        )
        .await
        .map_err(to_status)?;

        Ok(Response::new(ValidateHostEnvReply {}))
    }

    #[instrument(skip(self, request))]
    async fn make_segment(
        &self,
        request: Request<MakeSegmentRequest>,
    ) -> std::result::Result<Response<MakeSegmentReply>, Status> {
        let request = request.into_inner();
        let segment = request
            .segment
            .ok_or_else(|| Status::invalid_argument("request has no segment"))?;
        let segment = SegmentDescriptor::try_from(segment).map_err(to_status)?;

        let settings = SegmentRequest {
            locale: request.locale.map(Locale::from).unwrap_or_default(),
            encoding: request.encoding,
            config: request.seg_config,
            coordinator_addresses: request.coordinator_addresses,
            hba_hostnames: request.hba_hostnames,
            data_checksums: request.data_checksums,
        };

        self.segments
            .make_segment(&segment, &settings)
            .await
            .map_err(to_status)?;

        Ok(Response::new(MakeSegmentReply {}))
    }

    #[instrument(skip(self))]
    async fn start_segment(
        &self,
        request: Request<StartSegmentRequest>,
    ) -> std::result::Result<Response<StartSegmentReply>, Status> {
        let request = request.into_inner();
        self.segments
            .start_segment(&request.data_dir, request.wait, request.timeout, &request.options)
            .await
            .map_err(to_status)?;

        Ok(Response::new(StartSegmentReply {}))
    }

    #[instrument(skip(self))]
    async fn stop_segment(
        &self,
        request: Request<StopSegmentRequest>,
    ) -> std::result::Result<Response<StopSegmentReply>, Status> {
        let request = request.into_inner();
        self.segments
            .stop_segment(&request.data_dir, request.wait, request.timeout, &request.mode)
            .await
            .map_err(to_status)?;

        Ok(Response::new(StopSegmentReply {}))
    }

    async fn status(
        &self,
        _request: Request<StatusAgentRequest>,
    ) -> std::result::Result<Response<StatusAgentReply>, Status> {
        Ok(Response::new(StatusAgentReply {
            status: "running".to_string(),
            uptime: self.uptime(),
            pid: std::process::id(),
        }))
    }

    async fn stop(
        &self,
        _request: Request<StopAgentRequest>,
    ) -> std::result::Result<Response<StopAgentReply>, Status> {
        info!("Received stop request");
        self.shutdown.cancel();
        Ok(Response::new(StopAgentReply {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::LocalSystem;
    use gpctl_common::{Credentials, ProcessRunner};

    fn service() -> AgentService {
        let config = AgentConfig {
            agent_port: 0,
            service_name: "gp".to_string(),
            gphome: "/usr/local/gpdb".into(),
            credentials: Credentials::insecure(),
        };
        AgentService::new(config, Arc::new(ProcessRunner), Arc::new(LocalSystem))
    }

    #[tokio::test]
    async fn test_status_reports_own_pid() {
        let reply = service()
            .status(Request::new(StatusAgentRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(reply.status, "running");
        assert_eq!(reply.pid, std::process::id());
    }

    #[tokio::test]
    async fn test_stop_cancels_shutdown_token() {
        let service = service();
        let token = service.shutdown_token();
        service.stop(Request::new(StopAgentRequest {})).await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_make_segment_requires_segment() {
        let status = service()
            .make_segment(Request::new(MakeSegmentRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }
}
