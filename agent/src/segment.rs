use crate::conf;
use crate::system::HostSystem;
use gpctl_common::{
    CommandBuilder, CommandRunner, Initdb, Locale, PgCtlStart, PgCtlStop, Result, SegmentDescriptor,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Host-independent settings for creating a segment
#[derive(Debug, Clone, Default)]
pub struct SegmentRequest {
    pub locale: Locale,
    pub encoding: String,
    /// Merged postgresql.conf parameters
    pub config: HashMap<String, String>,
    pub coordinator_addresses: Vec<String>,
    pub hba_hostnames: bool,
    pub data_checksums: bool,
}

/// Creates, starts and stops the segments of this host
pub struct SegmentManager {
    gphome: PathBuf,
    runner: Arc<dyn CommandRunner>,
    system: Arc<dyn HostSystem>,
}

impl SegmentManager {
    pub fn new(gphome: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>, system: Arc<dyn HostSystem>) -> Self {
        Self {
            gphome: gphome.into(),
            runner,
            system,
        }
    }

    pub fn gphome(&self) -> &Path {
        &self.gphome
    }

    /// Run initdb for the segment, then write its configuration files
    pub async fn make_segment(&self, segment: &SegmentDescriptor, request: &SegmentRequest) -> Result<()> {
        let data_dir = Path::new(&segment.data_directory);
        info!(
            "Creating segment content={} dbid={} in {}",
            segment.content_id, segment.dbid, segment.data_directory
        );

        let initdb = Initdb {
            pgdata: segment.data_directory.clone(),
            encoding: request.encoding.clone(),
            lc_collate: request.locale.lc_collate.clone(),
            lc_ctype: request.locale.lc_ctype.clone(),
            lc_messages: request.locale.lc_messages.clone(),
            lc_monetary: request.locale.lc_monetary.clone(),
            lc_numeric: request.locale.lc_numeric.clone(),
            lc_time: request.locale.lc_time.clone(),
            data_checksums: request.data_checksums,
        };
        self.runner.run(&initdb.build(&self.gphome)).await?;

        conf::update_postgresql_conf(data_dir, &instance_parameters(segment, &request.config), false).await?;
        conf::create_internal_conf(data_dir, segment.dbid).await?;

        let user = self.system.current_user()?;
        let addresses = if request.hba_hostnames {
            vec![segment.hostname.clone()]
        } else {
            self.system.host_addresses(&segment.hostname).await?
        };

        if segment.is_coordinator() {
            conf::update_coordinator_hba(data_dir, &user, &addresses).await
        } else {
            conf::update_segment_hba(data_dir, &user, &request.coordinator_addresses, &addresses).await
        }
    }

    pub async fn start_segment(&self, data_dir: &str, wait: bool, timeout: u32, options: &str) -> Result<()> {
        let start = PgCtlStart {
            pgdata: data_dir.to_string(),
            wait,
            timeout,
            logfile: startup_log(data_dir),
            options: options.to_string(),
            ..Default::default()
        };
        self.runner.run(&start.build(&self.gphome)).await?;
        Ok(())
    }

    pub async fn stop_segment(&self, data_dir: &str, wait: bool, timeout: u32, mode: &str) -> Result<()> {
        let stop = PgCtlStop {
            pgdata: data_dir.to_string(),
            wait,
            timeout,
            mode: mode.to_string(),
            ..Default::default()
        };
        self.runner.run(&stop.build(&self.gphome)).await?;
        Ok(())
    }
}

/// Merged config plus the settings owned by the instance itself
pub fn instance_parameters(
    segment: &SegmentDescriptor,
    config: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut params = config.clone();
    params.insert("port".to_string(), segment.port.to_string());
    params.insert("listen_addresses".to_string(), "*".to_string());
    params.insert("gp_contentid".to_string(), segment.content_id.to_string());
    if segment.is_coordinator() {
        params.insert("log_statement".to_string(), "all".to_string());
    }
    params
}

fn startup_log(data_dir: &str) -> String {
    Path::new(data_dir)
        .join("log")
        .join("startup.log")
        .display()
        .to_string()
}
