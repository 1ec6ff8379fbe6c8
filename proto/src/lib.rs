//! gRPC definitions of the hub and agent services, plus conversions between
//! the wire messages and the types in `gpctl-common`.

use gpctl_common::{
    ClusterParams as CommonClusterParams, ClusterSpecification, GpError, Locale as CommonLocale,
    ProgressEvent, ProgressTick, SegmentDescriptor, ServiceStatus as CommonServiceStatus, TickKind,
};
use tonic::{Code, Status};

tonic::include_proto!("gpctl");

pub use agent_client::AgentClient as ProtoAgentClient;
pub use agent_server::{Agent, AgentServer};
pub use hub_client::HubClient as ProtoHubClient;
pub use hub_server::{Hub, HubServer};

impl From<&SegmentDescriptor> for Segment {
    fn from(seg: &SegmentDescriptor) -> Self {
        Segment {
            hostname: seg.hostname.clone(),
            address: seg.address.clone(),
            port: i32::from(seg.port),
            data_directory: seg.data_directory.clone(),
            content_id: seg.content_id,
            dbid: seg.dbid,
        }
    }
}

impl TryFrom<Segment> for SegmentDescriptor {
    type Error = GpError;

    fn try_from(seg: Segment) -> Result<Self, Self::Error> {
        let port = u16::try_from(seg.port).map_err(|_| GpError::InvalidSpec {
            message: format!("invalid port {} for host {}", seg.port, seg.hostname),
        })?;

        let mut descriptor = SegmentDescriptor::new(seg.hostname, seg.address, port, seg.data_directory);
        descriptor.content_id = seg.content_id;
        descriptor.dbid = seg.dbid;
        Ok(descriptor)
    }
}

impl From<&CommonLocale> for Locale {
    fn from(locale: &CommonLocale) -> Self {
        Locale {
            lc_all: locale.lc_all.clone(),
            lc_collate: locale.lc_collate.clone(),
            lc_ctype: locale.lc_ctype.clone(),
            lc_messages: locale.lc_messages.clone(),
            lc_monetary: locale.lc_monetary.clone(),
            lc_numeric: locale.lc_numeric.clone(),
            lc_time: locale.lc_time.clone(),
        }
    }
}

impl From<Locale> for CommonLocale {
    fn from(locale: Locale) -> Self {
        CommonLocale {
            lc_all: locale.lc_all,
            lc_collate: locale.lc_collate,
            lc_ctype: locale.lc_ctype,
            lc_messages: locale.lc_messages,
            lc_monetary: locale.lc_monetary,
            lc_numeric: locale.lc_numeric,
            lc_time: locale.lc_time,
        }
    }
}

impl From<&CommonClusterParams> for ClusterParams {
    fn from(params: &CommonClusterParams) -> Self {
        ClusterParams {
            common_config: params.common_config.clone(),
            coordinator_config: params.coordinator_config.clone(),
            segment_config: params.segment_config.clone(),
            locale: Some(Locale::from(&params.locale)),
            encoding: params.encoding.clone(),
            hba_hostnames: params.hba_hostnames,
            su_password: params.su_password.clone(),
            db_name: params.db_name.clone(),
            data_checksums: params.data_checksums,
        }
    }
}

impl From<ClusterParams> for CommonClusterParams {
    fn from(params: ClusterParams) -> Self {
        CommonClusterParams {
            common_config: params.common_config,
            coordinator_config: params.coordinator_config,
            segment_config: params.segment_config,
            locale: params.locale.map(CommonLocale::from).unwrap_or_default(),
            encoding: params.encoding,
            hba_hostnames: params.hba_hostnames,
            su_password: params.su_password.filter(|p| !p.is_empty()),
            db_name: params.db_name.filter(|d| !d.is_empty()),
            data_checksums: params.data_checksums,
        }
    }
}

impl From<&ClusterSpecification> for MakeClusterRequest {
    fn from(spec: &ClusterSpecification) -> Self {
        MakeClusterRequest {
            coordinator: Some(Segment::from(&spec.coordinator)),
            primaries: spec.primaries.iter().map(Segment::from).collect(),
            cluster_params: Some(ClusterParams::from(&spec.params)),
            force: spec.force,
        }
    }
}

impl TryFrom<MakeClusterRequest> for ClusterSpecification {
    type Error = GpError;

    fn try_from(request: MakeClusterRequest) -> Result<Self, Self::Error> {
        let coordinator = request.coordinator.ok_or_else(|| GpError::InvalidSpec {
            message: "request has no coordinator segment".to_string(),
        })?;

        Ok(ClusterSpecification {
            coordinator: SegmentDescriptor::try_from(coordinator)?,
            primaries: request
                .primaries
                .into_iter()
                .map(SegmentDescriptor::try_from)
                .collect::<Result<Vec<_>, _>>()?,
            params: request
                .cluster_params
                .map(CommonClusterParams::from)
                .unwrap_or_default(),
            force: request.force,
        })
    }
}

impl From<ProgressEvent> for HubReply {
    fn from(event: ProgressEvent) -> Self {
        let message = match event {
            ProgressEvent::Log(msg) => hub_reply::Message::LogMsg(msg),
            ProgressEvent::Stdout(out) => hub_reply::Message::StdoutMsg(out),
            ProgressEvent::Progress(tick) => hub_reply::Message::ProgressMsg(ProgressMessage {
                label: tick.label,
                tick: Some(match tick.kind {
                    TickKind::Init { total } => progress_message::Tick::Total(total),
                    TickKind::Increment => progress_message::Tick::Increment(true),
                }),
            }),
        };

        HubReply {
            message: Some(message),
        }
    }
}

impl TryFrom<HubReply> for ProgressEvent {
    type Error = GpError;

    fn try_from(reply: HubReply) -> Result<Self, Self::Error> {
        match reply.message {
            Some(hub_reply::Message::LogMsg(msg)) => Ok(ProgressEvent::Log(msg)),
            Some(hub_reply::Message::StdoutMsg(out)) => Ok(ProgressEvent::Stdout(out)),
            Some(hub_reply::Message::ProgressMsg(progress)) => {
                let kind = match progress.tick {
                    Some(progress_message::Tick::Total(total)) => TickKind::Init { total },
                    Some(progress_message::Tick::Increment(_)) => TickKind::Increment,
                    None => {
                        return Err(GpError::Serialization(format!(
                            "progress message for {} carries no tick",
                            progress.label
                        )))
                    }
                };
                Ok(ProgressEvent::Progress(ProgressTick {
                    label: progress.label,
                    kind,
                }))
            }
            None => Err(GpError::Serialization("empty hub reply".to_string())),
        }
    }
}

impl From<&CommonServiceStatus> for ServiceStatus {
    fn from(status: &CommonServiceStatus) -> Self {
        ServiceStatus {
            host: status.host.clone(),
            status: status.status.clone(),
            uptime: status.uptime.clone(),
            pid: status.pid,
        }
    }
}

impl From<ServiceStatus> for CommonServiceStatus {
    fn from(status: ServiceStatus) -> Self {
        CommonServiceStatus {
            host: status.host,
            status: status.status,
            uptime: status.uptime,
            pid: status.pid,
        }
    }
}

/// Map an error onto the gRPC status returned to the caller
pub fn error_to_status(err: &GpError) -> Status {
    let code = match err {
        GpError::Precondition { .. } => Code::FailedPrecondition,
        GpError::InvalidSpec { .. } | GpError::Config { .. } => Code::InvalidArgument,
        GpError::Connectivity { .. }
        | GpError::UnreachableHosts { .. }
        | GpError::UnreadyHosts { .. } => Code::Unavailable,
        _ => Code::Internal,
    };
    Status::new(code, err.to_string())
}

/// Turn a status returned by the agent on `host` back into an error,
/// keeping only the description the agent produced
pub fn status_to_error(host: &str, status: Status) -> GpError {
    match status.code() {
        Code::Unavailable => GpError::Connectivity {
            host: host.to_string(),
            message: status.message().to_string(),
        },
        Code::FailedPrecondition => GpError::Precondition {
            message: format!("host {}: {}", host, status.message()),
        },
        _ => GpError::remote(host, status.message()),
    }
}
