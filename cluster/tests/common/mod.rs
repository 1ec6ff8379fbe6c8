#![allow(dead_code)]

use gpctl_cluster::{AgentClient, AgentDialer, CatalogConnector, CatalogSession, CatalogTarget, EventSink};
use gpctl_common::{
    ClusterParams, ClusterSpecification, CommandRunner, ExternalCommand, GpError, ProgressEvent, Result,
    SegmentDescriptor, SegmentRole, ServiceStatus, TickKind,
};
use gpctl_proto::{MakeSegmentRequest, StartSegmentRequest, StopSegmentRequest};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What an agent does when asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBehavior {
    Reply,
    Vanish,
    Refuse,
}

/// In-process agent recording every request it receives
pub struct FakeAgent {
    pub host: String,
    pub validated: Mutex<Vec<(Vec<String>, bool)>>,
    pub made: Mutex<Vec<MakeSegmentRequest>>,
    pub started: Mutex<Vec<StartSegmentRequest>>,
    pub stopped: Mutex<Vec<StopSegmentRequest>>,
    pub validate_error: Mutex<Option<String>>,
    pub failing_dirs: Mutex<HashSet<String>>,
    pub unready: Mutex<bool>,
    pub hang_status: Mutex<bool>,
    pub stop_behavior: Mutex<StopBehavior>,
    pub stop_calls: AtomicUsize,
}

impl FakeAgent {
    pub fn new(host: &str) -> Arc<Self> {
        Arc::new(Self {
            host: host.to_string(),
            validated: Mutex::new(Vec::new()),
            made: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            validate_error: Mutex::new(None),
            failing_dirs: Mutex::new(HashSet::new()),
            unready: Mutex::new(false),
            hang_status: Mutex::new(false),
            stop_behavior: Mutex::new(StopBehavior::Reply),
            stop_calls: AtomicUsize::new(0),
        })
    }

    pub fn stop_count(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Data directories of every MakeSegment request, in arrival order
    pub fn made_dirs(&self) -> Vec<String> {
        self.made
            .lock()
            .iter()
            .filter_map(|r| r.segment.as_ref().map(|s| s.data_directory.clone()))
            .collect()
    }
}

#[async_trait::async_trait]
impl AgentClient for FakeAgent {
    async fn validate_host_env(&self, directories: Vec<String>, forced: bool) -> Result<()> {
        self.validated.lock().push((directories, forced));
        match self.validate_error.lock().clone() {
            Some(message) => Err(GpError::Precondition {
                message: format!("host {}: {}", self.host, message),
            }),
            None => Ok(()),
        }
    }

    async fn make_segment(&self, request: MakeSegmentRequest) -> Result<()> {
        let dir = request
            .segment
            .as_ref()
            .map(|s| s.data_directory.clone())
            .unwrap_or_default();
        self.made.lock().push(request);
        if self.failing_dirs.lock().contains(&dir) {
            return Err(GpError::remote(&self.host, format!("initdb failed for {}", dir)));
        }
        Ok(())
    }

    async fn start_segment(&self, request: StartSegmentRequest) -> Result<()> {
        self.started.lock().push(request);
        Ok(())
    }

    async fn stop_segment(&self, request: StopSegmentRequest) -> Result<()> {
        self.stopped.lock().push(request);
        Ok(())
    }

    async fn status(&self) -> Result<ServiceStatus> {
        let hang = *self.hang_status.lock();
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(ServiceStatus {
            host: String::new(),
            status: "running".to_string(),
            uptime: "5s".to_string(),
            pid: 100,
        })
    }

    async fn stop(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.stop_behavior.lock();
        match behavior {
            StopBehavior::Reply => Ok(()),
            StopBehavior::Vanish => Err(GpError::Connectivity {
                host: self.host.clone(),
                message: "transport is closing".to_string(),
            }),
            StopBehavior::Refuse => Err(GpError::remote(&self.host, "permission denied")),
        }
    }

    async fn ready(&self) -> Result<()> {
        if *self.unready.lock() {
            return Err(GpError::Connectivity {
                host: self.host.clone(),
                message: "channel not ready".to_string(),
            });
        }
        Ok(())
    }
}

/// Hands out [`FakeAgent`]s; hosts listed as unreachable fail to dial
#[derive(Default)]
pub struct FakeDialer {
    pub agents: Mutex<HashMap<String, Arc<FakeAgent>>>,
    pub unreachable: Mutex<HashSet<String>>,
    pub dials: Mutex<Vec<String>>,
}

impl FakeDialer {
    pub fn with_hosts(hosts: &[&str]) -> Arc<Self> {
        let dialer = Self::default();
        for host in hosts {
            dialer.agents.lock().insert(host.to_string(), FakeAgent::new(host));
        }
        Arc::new(dialer)
    }

    pub fn agent(&self, host: &str) -> Arc<FakeAgent> {
        self.agents.lock()[host].clone()
    }

    pub fn set_unreachable(&self, host: &str, unreachable: bool) {
        if unreachable {
            self.unreachable.lock().insert(host.to_string());
        } else {
            self.unreachable.lock().remove(host);
        }
    }

    pub fn dial_count(&self, host: &str) -> usize {
        self.dials.lock().iter().filter(|h| *h == host).count()
    }
}

#[async_trait::async_trait]
impl AgentDialer for FakeDialer {
    async fn dial(&self, host: &str) -> Result<Arc<dyn AgentClient>> {
        self.dials.lock().push(host.to_string());
        if self.unreachable.lock().contains(host) {
            return Err(GpError::Connectivity {
                host: host.to_string(),
                message: "connection refused".to_string(),
            });
        }
        let agent = self.agents.lock().get(host).cloned().ok_or_else(|| GpError::Connectivity {
            host: host.to_string(),
            message: "no such host".to_string(),
        })?;
        Ok(agent as Arc<dyn AgentClient>)
    }
}

/// Catalog state shared by every session of a [`FakeCatalog`]
#[derive(Default)]
pub struct CatalogState {
    pub rows: Vec<SegmentDescriptor>,
    pub statements: Vec<(CatalogTarget, String)>,
    /// (database, statement fragment) pairs that fail when executed
    pub failures: Vec<(String, String)>,
}

/// Mimics the segment-configuration functions of the coordinator
#[derive(Default, Clone)]
pub struct FakeCatalog {
    pub state: Arc<Mutex<CatalogState>>,
}

impl FakeCatalog {
    pub fn fail_on(&self, dbname: &str, fragment: &str) {
        self.state
            .lock()
            .failures
            .push((dbname.to_string(), fragment.to_string()));
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.iter().map(|(_, sql)| sql.clone()).collect()
    }

    pub fn statements_on(&self, dbname: &str) -> Vec<String> {
        self.state
            .lock()
            .statements
            .iter()
            .filter(|(target, _)| target.dbname == dbname)
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    pub fn targets(&self) -> Vec<CatalogTarget> {
        self.state.lock().statements.iter().map(|(t, _)| t.clone()).collect()
    }
}

#[async_trait::async_trait]
impl CatalogConnector for FakeCatalog {
    async fn connect(&self, target: &CatalogTarget) -> Result<Box<dyn CatalogSession>> {
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
            target: target.clone(),
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<CatalogState>>,
    target: CatalogTarget,
}

fn call_args(sql: &str) -> Vec<String> {
    let start = sql.find('(').map(|i| i + 1).unwrap_or(0);
    let end = sql.rfind(')').unwrap_or(sql.len());
    sql[start..end]
        .split(", ")
        .map(|arg| arg.trim_matches('\'').to_string())
        .collect()
}

impl CatalogState {
    fn add_segment(&mut self, args: &[String]) {
        let mut seg = SegmentDescriptor::new(&args[7], &args[8], args[6].parse().unwrap(), &args[9]);
        seg.dbid = args[0].trim_end_matches("::int2").parse().unwrap();
        seg.content_id = args[1].trim_end_matches("::int2").parse().unwrap();
        seg.role = SegmentRole::from_code(&args[2]).unwrap();
        seg.preferred_role = SegmentRole::from_code(&args[3]).unwrap();
        seg.mode = args[4].clone();
        seg.status = args[5].clone();
        self.rows.push(seg);
    }

    /// Next content id is one past the highest, never below 1
    fn add_segment_primary(&mut self, args: &[String]) {
        let content = self.rows.iter().map(|s| s.content_id).max().unwrap_or(0).max(0) + 1;
        let dbid = self.rows.iter().map(|s| s.dbid).max().unwrap_or(0) + 1;
        let mut seg = SegmentDescriptor::new(&args[0], &args[1], args[2].parse().unwrap(), &args[3]);
        seg.content_id = content;
        seg.dbid = dbid;
        seg.mode = "n".to_string();
        seg.status = "u".to_string();
        self.rows.push(seg);
    }
}

#[async_trait::async_trait]
impl CatalogSession for FakeSession {
    async fn execute(&self, sql: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.statements.push((self.target.clone(), sql.to_string()));

        let failing = state
            .failures
            .iter()
            .any(|(db, fragment)| *db == self.target.dbname && sql.contains(fragment.as_str()));
        if failing {
            return Err(GpError::catalog(format!("executing {}: injected failure", sql)));
        }

        if sql.starts_with("SELECT pg_catalog.gp_add_segment_primary(") {
            state.add_segment_primary(&call_args(sql));
        } else if sql.starts_with("SELECT pg_catalog.gp_add_segment(") {
            state.add_segment(&call_args(sql));
        } else if sql.starts_with("UPDATE gp_segment_configuration SET content = content - 1") {
            for seg in state.rows.iter_mut().filter(|s| s.content_id > 0) {
                seg.content_id -= 1;
            }
        }
        Ok(())
    }

    async fn query_segments(&self, sql: &str) -> Result<Vec<SegmentDescriptor>> {
        let mut state = self.state.lock();
        state.statements.push((self.target.clone(), sql.to_string()));
        // Rows come back in reverse insertion order to exercise local sorting
        Ok(state.rows.iter().rev().cloned().collect())
    }
}

/// Records commands and replays canned stdout for streamed ones
#[derive(Default)]
pub struct FakeRunner {
    pub commands: Mutex<Vec<ExternalCommand>>,
    pub output: Vec<String>,
    pub fail_program: Option<String>,
    pub runs: AtomicUsize,
}

impl FakeRunner {
    pub fn with_output(lines: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            output: lines.iter().map(|l| l.to_string()).collect(),
            ..Default::default()
        })
    }

    pub fn programs(&self) -> Vec<String> {
        self.commands.lock().iter().map(|c| c.name()).collect()
    }

    fn check(&self, command: &ExternalCommand) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.commands.lock().push(command.clone());
        if self.fail_program.as_deref() == Some(command.name().as_str()) {
            return Err(GpError::Command {
                command: command.name(),
                output: "exit status: 1".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, command: &ExternalCommand) -> Result<String> {
        self.check(command)?;
        Ok(String::new())
    }

    async fn run_streaming(&self, command: &ExternalCommand, output: mpsc::Sender<String>) -> Result<()> {
        self.check(command)?;
        for line in &self.output {
            if output.send(line.clone()).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<ProgressEvent>>,
}

#[async_trait::async_trait]
impl EventSink for Recorder {
    async fn send(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}

impl Recorder {
    pub fn logs(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Log(msg) => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn stdout(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Stdout(out) => Some(out.clone()),
                _ => None,
            })
            .collect()
    }

    /// (total from the initializer, number of increments) for `label`
    pub fn ticks(&self, label: &str) -> Option<(u32, usize)> {
        let events = self.events.lock();
        let mut total = None;
        let mut increments = 0;
        for event in events.iter() {
            if let ProgressEvent::Progress(tick) = event {
                if tick.label != label {
                    continue;
                }
                match tick.kind {
                    TickKind::Init { total: t } => total = Some(t),
                    TickKind::Increment => increments += 1,
                }
            }
        }
        total.map(|t| (t, increments))
    }
}

/// Coordinator on cdw, two primaries on sdw1
pub fn two_host_spec() -> ClusterSpecification {
    let mut params = ClusterParams {
        encoding: "UTF-8".to_string(),
        db_name: Some("analytics".to_string()),
        su_password: Some("changeme".to_string()),
        ..Default::default()
    };
    params
        .common_config
        .insert("shared_buffers".to_string(), "128000kB".to_string());
    params
        .coordinator_config
        .insert("max_connections".to_string(), "150".to_string());
    params
        .segment_config
        .insert("max_connections".to_string(), "450".to_string());

    ClusterSpecification {
        coordinator: SegmentDescriptor::new("cdw", "10.0.0.1", 7000, "/data/coordinator/gpseg-1"),
        primaries: vec![
            SegmentDescriptor::new("sdw1", "sdw1", 7002, "/data/primary/gpseg0"),
            SegmentDescriptor::new("sdw1", "sdw1", 7003, "/data/primary/gpseg1"),
        ],
        params,
        force: false,
    }
}
