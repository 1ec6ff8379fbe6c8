//! Database access to the coordinator's catalog.

use gpctl_common::{GpError, Result, SegmentDescriptor, SegmentRole, UTILITY_MODE_OPTIONS};
use std::time::Duration;
use tokio_postgres::NoTls;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and as whom to open a catalog session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTarget {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    /// Connect with `gp_role=utility`, for a coordinator started alone
    pub utility: bool,
}

impl CatalogTarget {
    pub fn new(host: impl Into<String>, port: u16, dbname: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            dbname: dbname.into(),
            user: user.into(),
            utility: false,
        }
    }

    pub fn utility(mut self) -> Self {
        self.utility = true;
        self
    }

    /// Same server and user, another database
    pub fn with_database(&self, dbname: &str) -> Self {
        Self {
            dbname: dbname.to_string(),
            ..self.clone()
        }
    }
}

/// An open session on one database
#[async_trait::async_trait]
pub trait CatalogSession: Send + Sync {
    /// Run one or more statements, discarding any rows
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Run a query returning rows shaped like gp_segment_configuration
    async fn query_segments(&self, sql: &str) -> Result<Vec<SegmentDescriptor>>;
}

#[async_trait::async_trait]
pub trait CatalogConnector: Send + Sync {
    async fn connect(&self, target: &CatalogTarget) -> Result<Box<dyn CatalogSession>>;
}

/// Single-quoted SQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Double-quoted SQL identifier
pub fn quote_ident(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// [`CatalogConnector`] backed by tokio-postgres
#[derive(Debug, Clone, Default)]
pub struct PgConnector;

#[async_trait::async_trait]
impl CatalogConnector for PgConnector {
    async fn connect(&self, target: &CatalogTarget) -> Result<Box<dyn CatalogSession>> {
        let mut config = tokio_postgres::Config::new();
        config
            .application_name("gpctl")
            .host(&target.host)
            .port(target.port)
            .dbname(&target.dbname)
            .user(&target.user)
            .connect_timeout(CONNECT_TIMEOUT);
        if target.utility {
            config.options(UTILITY_MODE_OPTIONS);
        }

        let (client, connection) = config.connect(NoTls).await.map_err(|e| {
            GpError::catalog(format!(
                "connecting to database {} on {}:{}: {}",
                target.dbname, target.host, target.port, e
            ))
        })?;

        let dbname = target.dbname.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("Connection to database {} failed: {}", dbname, e);
            }
        });

        debug!("Connected to database {} on {}:{}", target.dbname, target.host, target.port);
        Ok(Box::new(PgSession { client }))
    }
}

struct PgSession {
    client: tokio_postgres::Client,
}

#[async_trait::async_trait]
impl CatalogSession for PgSession {
    async fn execute(&self, sql: &str) -> Result<()> {
        debug!("Executing SQL: {}", sql);
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| GpError::catalog(format!("executing {}: {}", sql, e)))
    }

    async fn query_segments(&self, sql: &str) -> Result<Vec<SegmentDescriptor>> {
        let rows = self.client.query(sql, &[]).await.map_err(GpError::catalog)?;
        rows.iter().map(segment_from_row).collect()
    }
}

fn segment_from_row(row: &tokio_postgres::Row) -> Result<SegmentDescriptor> {
    let port: i32 = row.try_get("port").map_err(GpError::catalog)?;
    let mut seg = SegmentDescriptor::new(
        row.try_get::<_, String>("hostname").map_err(GpError::catalog)?,
        row.try_get::<_, String>("address").map_err(GpError::catalog)?,
        u16::try_from(port).map_err(|_| GpError::catalog(format!("invalid port {}", port)))?,
        row.try_get::<_, String>("datadir").map_err(GpError::catalog)?,
    );
    seg.dbid = row.try_get("dbid").map_err(GpError::catalog)?;
    seg.content_id = row.try_get("content").map_err(GpError::catalog)?;
    seg.role = parse_role(&row.try_get::<_, String>("role").map_err(GpError::catalog)?)?;
    seg.preferred_role = parse_role(&row.try_get::<_, String>("preferred_role").map_err(GpError::catalog)?)?;
    seg.mode = row.try_get("mode").map_err(GpError::catalog)?;
    seg.status = row.try_get("status").map_err(GpError::catalog)?;
    Ok(seg)
}

fn parse_role(code: &str) -> Result<SegmentRole> {
    SegmentRole::from_code(code).ok_or_else(|| GpError::catalog(format!("unknown segment role {:?}", code)))
}
