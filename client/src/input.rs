//! Cluster input file: the document handed to `gp init cluster`.
//!
//! Keys are kebab-case. Missing settings are filled with the defaults a
//! fresh cluster needs before the request is sent to the hub.

use gpctl_common::constants::*;
use gpctl_common::{ClusterParams, ClusterSpecification, GpError, Locale, Result, SegmentDescriptor};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Lowest open-file limit recommended on the coordinator host
pub const OS_OPEN_FILES: u64 = 65535;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InputSegment {
    pub hostname: String,
    /// Defaults to the hostname
    #[serde(default)]
    pub address: String,
    pub port: u16,
    pub data_directory: String,
}

impl From<InputSegment> for SegmentDescriptor {
    fn from(seg: InputSegment) -> Self {
        let address = if seg.address.is_empty() {
            seg.hostname.clone()
        } else {
            seg.address
        };
        SegmentDescriptor::new(seg.hostname, address, seg.port, seg.data_directory)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InputFile {
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub hba_hostnames: bool,
    #[serde(default)]
    pub su_password: Option<String>,
    #[serde(default)]
    pub data_checksums: bool,
    #[serde(default)]
    pub locale: Locale,
    #[serde(default)]
    pub common_config: HashMap<String, String>,
    #[serde(default)]
    pub coordinator_config: HashMap<String, String>,
    #[serde(default)]
    pub segment_config: HashMap<String, String>,
    pub coordinator: InputSegment,
    #[serde(default)]
    pub primary_segments_array: Vec<InputSegment>,
}

impl InputFile {
    /// Read an input file; the format follows the file extension
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(GpError::Config {
                message: format!("input file {} does not exist", path.display()),
            });
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| GpError::Config {
                message: format!("could not read {}: {}", path.display(), e),
            })?;

        settings.try_deserialize().map_err(|e| GpError::Config {
            message: format!("invalid input file {}: {}", path.display(), e),
        })
    }

    /// Apply defaults, validate, and build the request for the hub
    pub fn into_specification(self, force: bool) -> Result<ClusterSpecification> {
        if self.primary_segments_array.is_empty() {
            return Err(GpError::InvalidSpec {
                message: "no primary segments are provided in the input file".to_string(),
            });
        }

        let db_name = match self.db_name.filter(|name| !name.is_empty()) {
            Some(name) => name,
            None => {
                info!("Database name is not set, will set to default {}", DEFAULT_DATABASE);
                DEFAULT_DATABASE.to_string()
            }
        };

        let encoding = match self.encoding.filter(|enc| !enc.is_empty()) {
            Some(enc) => enc,
            None => {
                info!("Could not find encoding in cluster config, defaulting to {}", DEFAULT_ENCODING);
                DEFAULT_ENCODING.to_string()
            }
        };
        if encoding.eq_ignore_ascii_case("SQL_ASCII") {
            return Err(GpError::InvalidSpec {
                message: "SQL_ASCII is no longer supported as a server encoding".to_string(),
            });
        }

        let mut coordinator_config = self.coordinator_config;
        let mut segment_config = self.segment_config;
        let mut common_config = self.common_config;

        let coordinator_max = match coordinator_config.get("max_connections") {
            Some(value) => parse_max_connections(value)?,
            None => {
                info!(
                    "Coordinator max_connections not set, will set to default value {}",
                    DEFAULT_COORDINATOR_MAX_CONNECTIONS
                );
                coordinator_config.insert(
                    "max_connections".to_string(),
                    DEFAULT_COORDINATOR_MAX_CONNECTIONS.to_string(),
                );
                DEFAULT_COORDINATOR_MAX_CONNECTIONS
            }
        };

        segment_config
            .entry("max_connections".to_string())
            .or_insert_with(|| (coordinator_max * SEGMENT_CONNECTION_FACTOR).to_string());

        if !common_config.contains_key("shared_buffers") {
            info!("shared_buffers is not set, will set to default value {}", DEFAULT_SHARED_BUFFERS);
            common_config.insert("shared_buffers".to_string(), DEFAULT_SHARED_BUFFERS.to_string());
        }

        let spec = ClusterSpecification {
            coordinator: self.coordinator.into(),
            primaries: self.primary_segments_array.into_iter().map(Into::into).collect(),
            params: ClusterParams {
                common_config,
                coordinator_config,
                segment_config,
                locale: self.locale,
                encoding,
                hba_hostnames: self.hba_hostnames,
                su_password: self.su_password.filter(|p| !p.is_empty()),
                db_name: Some(db_name),
                data_checksums: self.data_checksums,
            },
            force,
        };

        spec.validate()?;
        Ok(spec)
    }
}

fn parse_max_connections(value: &str) -> Result<u32> {
    let parsed: i64 = value.trim().parse().map_err(|e| GpError::InvalidSpec {
        message: format!("error parsing max_connections {:?}: {}", value, e),
    })?;
    if parsed < 1 {
        return Err(GpError::InvalidSpec {
            message: "coordinator max_connections is less than 1".to_string(),
        });
    }
    u32::try_from(parsed).map_err(|_| GpError::InvalidSpec {
        message: format!("max_connections {} is out of range", parsed),
    })
}

/// Soft open-file limit of this process, if it can be read
pub fn open_file_limit() -> Option<u64> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit only writes into the struct we pass
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    if rc == 0 {
        Some(limit.rlim_cur as u64)
    } else {
        None
    }
}

/// Warn when the coordinator host allows fewer open files than recommended
pub fn check_open_file_limit() {
    if let Some(limit) = open_file_limit() {
        if limit < OS_OPEN_FILES {
            warn!("Coordinator open file limit is {} should be >= {}", limit, OS_OPEN_FILES);
        }
    }
}
