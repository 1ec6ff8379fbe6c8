use crate::catalog::{CatalogConnector, CatalogTarget};
use crate::finalize::DatabaseFinalizer;
use crate::pool::ConnectionPool;
use crate::provisioner;
use crate::registrar::{select_primaries, Registrar};
use crate::stream::{EventSink, ProgressTracker, STREAM_BUFFER};
use crate::validator::validate_environment;
use gpctl_common::{
    ClusterSpecification, CommandBuilder, CommandRunner, GpError, GpStart, PgCtlStop, ProgressEvent,
    Result, SegmentDescriptor,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Databases every new cluster already has
const BUILTIN_DATABASES: [&str; 3] = ["template0", "template1", "postgres"];

/// Steps of the MakeCluster workflow, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Connecting,
    Validating,
    ProvisioningCoordinator,
    Registering,
    ProvisioningPrimaries,
    Restarting,
    FinalizingDatabase,
    Done,
}

impl LifecycleState {
    fn description(&self) -> &'static str {
        match self {
            LifecycleState::Connecting => "Connecting to agents",
            LifecycleState::Validating => "Validating host environments",
            LifecycleState::ProvisioningCoordinator => "Creating coordinator segment",
            LifecycleState::Registering => "Registering segments with the coordinator",
            LifecycleState::ProvisioningPrimaries => "Creating primary segments",
            LifecycleState::Restarting => "Restarting the cluster in production mode",
            LifecycleState::FinalizingDatabase => "Finalizing databases",
            LifecycleState::Done => "Cluster created",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Drives a cluster from an input specification to a running system
pub struct ClusterLifecycle {
    pool: Arc<ConnectionPool>,
    connector: Arc<dyn CatalogConnector>,
    runner: Arc<dyn CommandRunner>,
    gphome: PathBuf,
    superuser: String,
}

impl ClusterLifecycle {
    pub fn new(
        pool: Arc<ConnectionPool>,
        connector: Arc<dyn CatalogConnector>,
        runner: Arc<dyn CommandRunner>,
        gphome: impl Into<PathBuf>,
        superuser: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            connector,
            runner,
            gphome: gphome.into(),
            superuser: superuser.into(),
        }
    }

    /// Run MakeCluster to completion, streaming progress into `sink`.
    ///
    /// Any failure stops the workflow where it is; nothing is rolled back.
    /// The error text is streamed as a final log event and returned.
    pub async fn make_cluster(&self, spec: &ClusterSpecification, sink: &dyn EventSink) -> Result<()> {
        let tracker = ProgressTracker::new(sink);
        match self.run(spec, &tracker).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("MakeCluster failed: {}", e);
                sink.send(ProgressEvent::Log(format!("error: {}", e))).await;
                Err(e)
            }
        }
    }

    async fn enter(&self, state: LifecycleState, sink: &dyn EventSink) {
        info!("MakeCluster state={}", state);
        sink.send(ProgressEvent::log(state.description())).await;
    }

    async fn run(&self, spec: &ClusterSpecification, sink: &dyn EventSink) -> Result<()> {
        spec.validate()?;

        self.enter(LifecycleState::Connecting, sink).await;
        self.pool.ensure_connections(&spec.hosts()).await?;

        self.enter(LifecycleState::Validating, sink).await;
        validate_environment(&self.pool, spec, sink).await?;

        self.enter(LifecycleState::ProvisioningCoordinator, sink).await;
        provisioner::create_and_start_coordinator(&self.pool, &spec.coordinator, &spec.params).await?;

        self.enter(LifecycleState::Registering, sink).await;
        let primaries = self.register(spec).await?;

        self.enter(LifecycleState::ProvisioningPrimaries, sink).await;
        let coordinator_addresses =
            provisioner::coordinator_hba_addresses(&spec.coordinator, spec.params.hba_hostnames);
        provisioner::create_segments(&self.pool, &primaries, &spec.params, &coordinator_addresses, sink)
            .await?;

        self.enter(LifecycleState::Restarting, sink).await;
        self.restart(spec, sink).await?;

        self.enter(LifecycleState::FinalizingDatabase, sink).await;
        self.finalize(spec, sink).await?;

        self.enter(LifecycleState::Done, sink).await;
        Ok(())
    }

    fn coordinator_target(&self, spec: &ClusterSpecification) -> CatalogTarget {
        CatalogTarget::new(
            spec.coordinator.hostname.clone(),
            spec.coordinator.port,
            "postgres",
            self.superuser.clone(),
        )
    }

    /// Record the coordinator and primaries, then read back the primaries
    /// with their catalog-assigned content ids and dbids
    async fn register(&self, spec: &ClusterSpecification) -> Result<Vec<SegmentDescriptor>> {
        let session = self
            .connector
            .connect(&self.coordinator_target(spec).utility())
            .await?;

        let registrar = Registrar::new(session.as_ref());
        registrar.register_coordinator(&spec.coordinator).await?;
        registrar.register_primaries(&spec.primaries).await?;

        let primaries = select_primaries(&registrar.read_catalog().await?);
        if primaries.len() != spec.primaries.len() {
            return Err(GpError::catalog(format!(
                "expected {} primary segments in the catalog, found {}",
                spec.primaries.len(),
                primaries.len()
            )));
        }
        Ok(primaries)
    }

    /// Stop the utility-mode coordinator and bring the whole cluster up
    async fn restart(&self, spec: &ClusterSpecification, sink: &dyn EventSink) -> Result<()> {
        let data_directory = spec.coordinator.data_directory.clone();

        sink.send(ProgressEvent::log("Shutting down coordinator segment")).await;
        let stop = PgCtlStop {
            pgdata: data_directory.clone(),
            ..Default::default()
        };
        self.runner.run(&stop.build(&self.gphome)).await?;

        let start = GpStart { data_directory }.build(&self.gphome);
        let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);
        let forward = async {
            while let Some(line) = rx.recv().await {
                sink.send(ProgressEvent::Stdout(line)).await;
            }
        };
        let (started, ()) = tokio::join!(self.runner.run_streaming(&start, tx), forward);
        started?;

        sink.send(ProgressEvent::log("Completed restart of the cluster in production mode")).await;
        Ok(())
    }

    async fn finalize(&self, spec: &ClusterSpecification, sink: &dyn EventSink) -> Result<()> {
        let finalizer = DatabaseFinalizer::new(self.connector.as_ref(), self.coordinator_target(spec), sink);

        finalizer.create_toolkit_extension().await?;
        finalizer.import_collations().await?;

        match spec.params.db_name.as_deref() {
            Some(name) if !BUILTIN_DATABASES.contains(&name) => finalizer.create_database(name).await?,
            Some(name) => info!("Database {} already exists, not creating it", name),
            None => {}
        }

        match &spec.params.su_password {
            Some(password) => finalizer.set_superuser_password(&self.superuser, password).await?,
            None => info!("No superuser password given, leaving it unset"),
        }

        Ok(())
    }
}
