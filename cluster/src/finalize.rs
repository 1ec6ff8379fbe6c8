//! Post-start database setup: extensions, collations, optional user
//! database and the superuser password.

use crate::catalog::{quote_ident, quote_literal, CatalogConnector, CatalogTarget};
use crate::stream::EventSink;
use gpctl_common::{GpError, ProgressEvent, Result};
use tracing::{error, info};

const IMPORT_COLLATIONS: &str = "SELECT pg_import_system_collations('pg_catalog'); ANALYZE;";
const VACUUM_FREEZE: &str = "VACUUM FREEZE";

pub struct DatabaseFinalizer<'a> {
    connector: &'a dyn CatalogConnector,
    target: CatalogTarget,
    sink: &'a dyn EventSink,
}

impl<'a> DatabaseFinalizer<'a> {
    /// `target` names the coordinator; its database is replaced per statement
    pub fn new(connector: &'a dyn CatalogConnector, target: CatalogTarget, sink: &'a dyn EventSink) -> Self {
        Self { connector, target, sink }
    }

    async fn log(&self, message: String) {
        info!("{}", message);
        self.sink.send(ProgressEvent::Log(message)).await;
    }

    /// Run `sql` on its own session against `dbname`
    async fn exec_on(&self, dbname: &str, sql: &str) -> Result<()> {
        let session = self.connector.connect(&self.target.with_database(dbname)).await?;
        session.execute(sql).await
    }

    pub async fn create_toolkit_extension(&self) -> Result<()> {
        self.log("Creating core extensions".to_string()).await;
        for dbname in ["template1", "postgres"] {
            self.exec_on(dbname, "CREATE EXTENSION gp_toolkit").await?;
        }
        Ok(())
    }

    /// Import system collations into template0, template1 and postgres.
    ///
    /// template0 only accepts connections while the import runs. If anything
    /// fails in that window, connections are disabled again before returning
    /// and the error is reported as a catalog inconsistency.
    pub async fn import_collations(&self) -> Result<()> {
        self.log("Importing system collations".to_string()).await;

        self.exec_on("postgres", "ALTER DATABASE template0 ALLOW_CONNECTIONS on")
            .await?;

        let imported = async {
            self.exec_on("template0", IMPORT_COLLATIONS).await?;
            self.exec_on("template0", VACUUM_FREEZE).await
        }
        .await;

        let disabled = self
            .exec_on("postgres", "ALTER DATABASE template0 ALLOW_CONNECTIONS off")
            .await;

        match (imported, disabled) {
            (Ok(()), Ok(())) => {}
            (Err(e), Ok(())) => {
                error!("Collation import into template0 failed: {}", e);
                return Err(GpError::CatalogInconsistency {
                    message: format!("importing collations into template0: {}", e),
                });
            }
            (imported, Err(e)) => {
                let cause = match imported {
                    Err(import_err) => format!("{}; ", import_err),
                    Ok(()) => String::new(),
                };
                error!("Could not disable connections to template0: {}", e);
                return Err(GpError::CatalogInconsistency {
                    message: format!(
                        "{}template0 may still allow connections: {}",
                        cause, e
                    ),
                });
            }
        }

        for dbname in ["template1", "postgres"] {
            self.exec_on(dbname, IMPORT_COLLATIONS).await?;
            self.exec_on(dbname, VACUUM_FREEZE).await?;
        }
        Ok(())
    }

    pub async fn create_database(&self, name: &str) -> Result<()> {
        self.log(format!("Creating database {:?}", name)).await;
        self.exec_on("template1", &format!("CREATE DATABASE {}", quote_ident(name)))
            .await
    }

    pub async fn set_superuser_password(&self, user: &str, password: &str) -> Result<()> {
        self.log("Setting superuser password".to_string()).await;
        let sql = format!(
            "ALTER USER {} WITH PASSWORD {}",
            quote_ident(user),
            quote_literal(password)
        );
        self.exec_on("template1", &sql).await
    }
}
