use crate::agent::GrpcDialer;
use crate::catalog::{CatalogConnector, PgConnector};
use crate::fanout::execute_rpc;
use crate::lifecycle::ClusterLifecycle;
use crate::pool::ConnectionPool;
use crate::stream::{ChannelSink, EventSink, ReplyResult, STREAM_BUFFER};
use gpctl_common::{
    ClusterSpecification, CommandBuilder, CommandRunner, GpError, GpSsh, HubConfig, ProcessRunner,
    ProgressEvent, Result, ServiceStatus,
};
use gpctl_proto::{
    error_to_status, DialAgentsReply, DialAgentsRequest, Hub, HubServer, MakeClusterRequest,
    StartAgentsReply, StartAgentsRequest, StatusAgentsReply, StatusAgentsRequest, StopAgentsReply,
    StopAgentsRequest, StopHubReply, StopHubRequest,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{error, info, instrument, warn};

/// The hub's gRPC service
pub struct HubService {
    config: HubConfig,
    config_path: PathBuf,
    pool: Arc<ConnectionPool>,
    lifecycle: Arc<ClusterLifecycle>,
    runner: Arc<dyn CommandRunner>,
    shutdown: CancellationToken,
}

impl HubService {
    pub fn new(
        config: HubConfig,
        config_path: impl Into<PathBuf>,
        pool: Arc<ConnectionPool>,
        connector: Arc<dyn CatalogConnector>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let lifecycle = ClusterLifecycle::new(
            pool.clone(),
            connector,
            runner.clone(),
            config.gphome.clone(),
            config.database_superuser()?,
        );

        Ok(Self {
            config,
            config_path: config_path.into(),
            pool,
            lifecycle: Arc::new(lifecycle),
            runner,
            shutdown: CancellationToken::new(),
        })
    }

    /// Hub wired to real agents, a real database and real processes
    pub fn from_config(config: HubConfig, config_path: impl Into<PathBuf>) -> Result<Self> {
        let dialer = GrpcDialer::new(config.agent_port, config.credentials.clone());
        let pool = Arc::new(ConnectionPool::new(Arc::new(dialer)));
        Self::new(config, config_path, pool, Arc::new(PgConnector), Arc::new(ProcessRunner))
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until a `Stop` RPC arrives or the token is cancelled
    pub async fn serve(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.hub_port));
        let shutdown = self.shutdown.clone();
        let pool = self.pool.clone();

        let mut builder = tonic::transport::Server::builder();
        if let Some(tls) = self.config.credentials.load_server_tls()? {
            builder = builder.tls_config(tls).map_err(|e| GpError::Config {
                message: format!("invalid hub TLS configuration: {}", e),
            })?;
        }

        info!("Hub listening on {}", addr);
        builder
            .add_service(HubServer::new(self))
            .serve_with_shutdown(addr, async move { shutdown.cancelled().await })
            .await
            .map_err(|e| GpError::internal(format!("hub server failed: {}", e)))?;

        pool.disconnect_all().await;
        info!("Hub stopped");
        Ok(())
    }

    /// Launch the agent on every configured host through gpssh
    pub async fn launch_agents(&self) -> Result<()> {
        let gp = self.config.gphome.join("bin").join("gp");
        let log = self.config.log_dir.join("gp_agent.log");
        let remote = format!(
            "nohup {} agent --config-file {} > {} 2>&1 &",
            gp.display(),
            self.config_path.display(),
            log.display()
        );

        let command = GpSsh {
            hosts: self.config.hostnames.clone(),
            command: vec![remote],
        }
        .build(&self.config.gphome);

        info!("Starting agents on {} hosts", self.config.hostnames.len());
        self.runner.run(&command).await?;
        Ok(())
    }

    pub async fn connect_agents(&self) -> Result<()> {
        self.pool.ensure_connections(&self.config.hostnames).await?;
        Ok(())
    }

    /// Status of the agent on every configured host, in host order
    pub async fn agent_statuses(&self) -> Result<Vec<ServiceStatus>> {
        let connections = self.pool.ensure_connections(&self.config.hostnames).await?;
        let statuses = Mutex::new(Vec::with_capacity(connections.len()));

        let collected = &statuses;
        execute_rpc(&connections, move |conn| async move {
            let mut status = conn.client.status().await?;
            status.host = conn.hostname.clone();
            collected.lock().push(status);
            Ok::<(), GpError>(())
        })
        .await?;

        let mut statuses = statuses.into_inner();
        let order = |host: &str| self.config.hostnames.iter().position(|h| h == host);
        statuses.sort_by_key(|s| order(&s.host));
        Ok(statuses)
    }

    /// Ask every agent to stop, then forget all connections.
    ///
    /// An agent that can no longer be reached counts as stopped; the
    /// reachable ones are still asked to stop.
    pub async fn shutdown_agents(&self) -> Result<()> {
        let connections = match self.pool.ensure_connections(&self.config.hostnames).await {
            Ok(connections) => connections,
            Err(GpError::UnreachableHosts { hosts }) | Err(GpError::UnreadyHosts { hosts }) => {
                warn!("Agents on {} are not reachable, treating them as stopped", hosts.join(", "));
                self.pool
                    .connections()
                    .await
                    .into_iter()
                    .filter(|conn| !hosts.contains(&conn.hostname))
                    .collect()
            }
            Err(e) => {
                self.pool.disconnect_all().await;
                return Err(e);
            }
        };

        let result = execute_rpc(&connections, |conn| async move {
            match conn.client.stop().await {
                Ok(()) | Err(GpError::Connectivity { .. }) => Ok(()),
                Err(e) => Err(e),
            }
        })
        .await;

        self.pool.disconnect_all().await;
        result?;
        Ok(())
    }
}

fn to_status(err: GpError) -> Status {
    error!("{}", err);
    error_to_status(&err)
}

#[tonic::async_trait]
impl Hub for HubService {
    type MakeClusterStream = ReceiverStream<ReplyResult>;

    /// Every failure, a malformed request included, reaches the client
    /// through the stream: a final `error:` log line, then the status.
    #[instrument(skip(self, request))]
    async fn make_cluster(
        &self,
        request: Request<MakeClusterRequest>,
    ) -> std::result::Result<Response<Self::MakeClusterStream>, Status> {
        let request = request.into_inner();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let lifecycle = self.lifecycle.clone();

        tokio::spawn(async move {
            let sink = ChannelSink::new(tx);
            let result = match ClusterSpecification::try_from(request) {
                Ok(spec) => lifecycle.make_cluster(&spec, &sink).await,
                Err(e) => {
                    error!("Rejecting MakeCluster request: {}", e);
                    sink.send(ProgressEvent::Log(format!("error: {}", e))).await;
                    Err(e)
                }
            };
            if let Err(e) = result {
                sink.fail(&e).await;
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    #[instrument(skip(self))]
    async fn start_agents(
        &self,
        _request: Request<StartAgentsRequest>,
    ) -> std::result::Result<Response<StartAgentsReply>, Status> {
        self.launch_agents().await.map_err(to_status)?;
        self.connect_agents().await.map_err(to_status)?;
        Ok(Response::new(StartAgentsReply {}))
    }

    #[instrument(skip(self))]
    async fn dial_agents(
        &self,
        _request: Request<DialAgentsRequest>,
    ) -> std::result::Result<Response<DialAgentsReply>, Status> {
        self.connect_agents().await.map_err(to_status)?;
        Ok(Response::new(DialAgentsReply {}))
    }

    #[instrument(skip(self))]
    async fn status_agents(
        &self,
        _request: Request<StatusAgentsRequest>,
    ) -> std::result::Result<Response<StatusAgentsReply>, Status> {
        let statuses = self.agent_statuses().await.map_err(to_status)?;
        Ok(Response::new(StatusAgentsReply {
            statuses: statuses.iter().map(Into::into).collect(),
        }))
    }

    #[instrument(skip(self))]
    async fn stop_agents(
        &self,
        _request: Request<StopAgentsRequest>,
    ) -> std::result::Result<Response<StopAgentsReply>, Status> {
        self.shutdown_agents().await.map_err(to_status)?;
        Ok(Response::new(StopAgentsReply {}))
    }

    async fn stop(
        &self,
        _request: Request<StopHubRequest>,
    ) -> std::result::Result<Response<StopHubReply>, Status> {
        info!("Received stop request");
        self.shutdown.cancel();
        Ok(Response::new(StopHubReply {}))
    }
}
