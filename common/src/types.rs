use crate::error::{GpError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// Content id reserved for the coordinator
pub const COORDINATOR_CONTENT_ID: i32 = -1;

/// Catalog dbid reserved for the coordinator
pub const COORDINATOR_DBID: i32 = 1;

/// Role of a segment as recorded in the segment-configuration catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SegmentRole {
    #[default]
    Primary,
    Mirror,
}

impl SegmentRole {
    /// Single-character catalog code
    pub fn code(&self) -> char {
        match self {
            SegmentRole::Primary => 'p',
            SegmentRole::Mirror => 'm',
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "p" => Some(SegmentRole::Primary),
            "m" => Some(SegmentRole::Mirror),
            _ => None,
        }
    }
}

impl std::fmt::Display for SegmentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One physical postgres instance of the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub hostname: String,
    /// Address used to reach the host, may differ from `hostname`
    pub address: String,
    pub port: u16,
    pub data_directory: String,
    /// -1 for the coordinator, >= 0 for primaries once registered
    #[serde(default)]
    pub content_id: i32,
    /// Catalog-assigned, 1 for the coordinator
    #[serde(default)]
    pub dbid: i32,
    #[serde(default)]
    pub role: SegmentRole,
    #[serde(default)]
    pub preferred_role: SegmentRole,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub status: String,
}

impl SegmentDescriptor {
    pub fn new(
        hostname: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        data_directory: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            address: address.into(),
            port,
            data_directory: data_directory.into(),
            content_id: 0,
            dbid: 0,
            role: SegmentRole::Primary,
            preferred_role: SegmentRole::Primary,
            mode: String::new(),
            status: String::new(),
        }
    }

    pub fn is_coordinator(&self) -> bool {
        self.content_id == COORDINATOR_CONTENT_ID
    }

    /// Content >= 0 and either the acting or the preferred role is primary
    pub fn is_primary(&self) -> bool {
        self.content_id >= 0
            && (self.role == SegmentRole::Primary || self.preferred_role == SegmentRole::Primary)
    }
}

/// Locale settings handed to initdb
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locale {
    #[serde(default)]
    pub lc_all: String,
    #[serde(default)]
    pub lc_collate: String,
    #[serde(default)]
    pub lc_ctype: String,
    #[serde(default)]
    pub lc_messages: String,
    #[serde(default)]
    pub lc_monetary: String,
    #[serde(default)]
    pub lc_numeric: String,
    #[serde(default)]
    pub lc_time: String,
}

/// Cluster-wide parameters of a MakeCluster call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterParams {
    #[serde(default)]
    pub common_config: HashMap<String, String>,
    #[serde(default)]
    pub coordinator_config: HashMap<String, String>,
    #[serde(default)]
    pub segment_config: HashMap<String, String>,
    #[serde(default)]
    pub locale: Locale,
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub hba_hostnames: bool,
    #[serde(default)]
    pub su_password: Option<String>,
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub data_checksums: bool,
}

/// Full input of the MakeCluster workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpecification {
    pub coordinator: SegmentDescriptor,
    pub primaries: Vec<SegmentDescriptor>,
    #[serde(default)]
    pub params: ClusterParams,
    /// Allows removal of existing data directories
    #[serde(default)]
    pub force: bool,
}

impl ClusterSpecification {
    /// Check the structural invariants of the cluster layout.
    pub fn validate(&self) -> Result<()> {
        if self.primaries.is_empty() {
            return Err(GpError::InvalidSpec {
                message: "no primary segments provided".to_string(),
            });
        }

        let mut dirs = HashSet::new();
        let mut ports = HashSet::new();
        for seg in self.segments() {
            if seg.hostname.is_empty() {
                return Err(GpError::InvalidSpec {
                    message: format!("segment with data directory {} has no hostname", seg.data_directory),
                });
            }
            if !Path::new(&seg.data_directory).is_absolute() {
                return Err(GpError::InvalidSpec {
                    message: format!(
                        "data directory {} on host {} is not an absolute path",
                        seg.data_directory, seg.hostname
                    ),
                });
            }
            if !dirs.insert((seg.hostname.as_str(), seg.data_directory.as_str())) {
                return Err(GpError::InvalidSpec {
                    message: format!(
                        "data directory {} is used more than once on host {}",
                        seg.data_directory, seg.hostname
                    ),
                });
            }
            if !ports.insert((seg.hostname.as_str(), seg.port)) {
                return Err(GpError::InvalidSpec {
                    message: format!("port {} is used more than once on host {}", seg.port, seg.hostname),
                });
            }
        }

        Ok(())
    }

    /// Coordinator followed by every primary
    pub fn segments(&self) -> impl Iterator<Item = &SegmentDescriptor> {
        std::iter::once(&self.coordinator).chain(self.primaries.iter())
    }

    /// Distinct host names, coordinator host first
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::new();
        for seg in self.segments() {
            if !hosts.contains(&seg.hostname) {
                hosts.push(seg.hostname.clone());
            }
        }
        hosts
    }

    /// Data directories owned by each host
    pub fn host_directories(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for seg in self.segments() {
            map.entry(seg.hostname.clone())
                .or_default()
                .push(seg.data_directory.clone());
        }
        map
    }
}

/// How a progress tick affects its labelled counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickKind {
    /// Creates the counter with the given total
    Init { total: u32 },
    /// Advances the counter by one
    Increment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressTick {
    pub label: String,
    pub kind: TickKind,
}

/// Event streamed from the hub to a waiting client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressEvent {
    Log(String),
    Stdout(String),
    Progress(ProgressTick),
}

impl ProgressEvent {
    pub fn log(message: impl Into<String>) -> Self {
        ProgressEvent::Log(message.into())
    }

    pub fn progress_init(label: impl Into<String>, total: u32) -> Self {
        ProgressEvent::Progress(ProgressTick {
            label: label.into(),
            kind: TickKind::Init { total },
        })
    }

    pub fn progress_increment(label: impl Into<String>) -> Self {
        ProgressEvent::Progress(ProgressTick {
            label: label.into(),
            kind: TickKind::Increment,
        })
    }
}

/// Service status reported by one agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub host: String,
    pub status: String,
    pub uptime: String,
    pub pid: u32,
}
