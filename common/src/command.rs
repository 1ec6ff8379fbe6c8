//! Builders for the database engine utilities and the runner that executes them.
//!
//! Each builder maps its fields onto command-line flags, skipping unset values.
//! Execution goes through the [`CommandRunner`] capability so the hub and the
//! agents can be exercised with in-process fakes.

use crate::error::{GpError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A fully-resolved external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Environment script sourced by a shell before running `program`
    pub source_file: Option<PathBuf>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            source_file: None,
        }
    }

    /// Run through `bash -c "source <gphome>/greenplum_path.sh && ..."`
    pub fn sourced(mut self, gphome: &Path) -> Self {
        self.source_file = Some(gphome.join("greenplum_path.sh"));
        self
    }

    /// Program name without its directory, for log and error messages
    pub fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .map(|part| shell_quote(&part))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Program and arguments actually handed to the OS
    pub fn argv(&self) -> (PathBuf, Vec<String>) {
        match &self.source_file {
            Some(source) => (
                PathBuf::from("bash"),
                vec![
                    "-c".to_string(),
                    format!("source {} && {}", shell_quote(&source.display().to_string()), self.command_line()),
                ],
            ),
            None => (self.program.clone(), self.args.clone()),
        }
    }
}

impl std::fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (program, args) = self.argv();
        write!(f, "{}", program.display())?;
        for arg in args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Path of a utility shipped in `<gphome>/bin`
pub fn utility_path(gphome: &Path, utility: &str) -> PathBuf {
    gphome.join("bin").join(utility)
}

/// Argument list that drops unset values
#[derive(Debug, Default)]
struct Args(Vec<String>);

impl Args {
    fn new(initial: &[&str]) -> Self {
        Self(initial.iter().map(|s| s.to_string()).collect())
    }

    fn text(mut self, flag: &str, value: &str) -> Self {
        if !value.is_empty() {
            self.0.push(flag.to_string());
            self.0.push(value.to_string());
        }
        self
    }

    fn number(mut self, flag: &str, value: u32) -> Self {
        if value != 0 {
            self.0.push(flag.to_string());
            self.0.push(value.to_string());
        }
        self
    }

    fn flag(mut self, flag: &str, set: bool) -> Self {
        if set {
            self.0.push(flag.to_string());
        }
        self
    }
}

/// Something that knows how to turn itself into an [`ExternalCommand`]
pub trait CommandBuilder {
    fn build(&self, gphome: &Path) -> ExternalCommand;
}

#[derive(Debug, Clone, Default)]
pub struct Initdb {
    pub pgdata: String,
    pub encoding: String,
    pub lc_collate: String,
    pub lc_ctype: String,
    pub lc_messages: String,
    pub lc_monetary: String,
    pub lc_numeric: String,
    pub lc_time: String,
    pub data_checksums: bool,
}

impl CommandBuilder for Initdb {
    fn build(&self, gphome: &Path) -> ExternalCommand {
        let args = Args::default()
            .text("--pgdata", &self.pgdata)
            .text("--encoding", &self.encoding)
            .text("--lc-collate", &self.lc_collate)
            .text("--lc-ctype", &self.lc_ctype)
            .text("--lc-messages", &self.lc_messages)
            .text("--lc-monetary", &self.lc_monetary)
            .text("--lc-numeric", &self.lc_numeric)
            .text("--lc-time", &self.lc_time)
            .flag("--data-checksums", self.data_checksums);

        ExternalCommand::new(utility_path(gphome, "initdb"), args.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PgCtlStart {
    pub pgdata: String,
    pub timeout: u32,
    pub wait: bool,
    pub no_wait: bool,
    pub logfile: String,
    pub options: String,
    pub mode: String,
}

impl CommandBuilder for PgCtlStart {
    fn build(&self, gphome: &Path) -> ExternalCommand {
        let args = Args::new(&["start"])
            .text("--pgdata", &self.pgdata)
            .number("--timeout", self.timeout)
            .flag("--wait", self.wait)
            .flag("--no-wait", self.no_wait)
            .text("--log", &self.logfile)
            .text("--options", &self.options)
            .text("--mode", &self.mode);

        ExternalCommand::new(utility_path(gphome, "pg_ctl"), args.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PgCtlStop {
    pub pgdata: String,
    pub timeout: u32,
    pub wait: bool,
    pub no_wait: bool,
    pub mode: String,
}

impl CommandBuilder for PgCtlStop {
    fn build(&self, gphome: &Path) -> ExternalCommand {
        let args = Args::new(&["stop"])
            .text("--pgdata", &self.pgdata)
            .number("--timeout", self.timeout)
            .flag("--wait", self.wait)
            .flag("--no-wait", self.no_wait)
            .text("--mode", &self.mode);

        ExternalCommand::new(utility_path(gphome, "pg_ctl"), args.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GpStart {
    pub data_directory: String,
}

impl CommandBuilder for GpStart {
    fn build(&self, gphome: &Path) -> ExternalCommand {
        let args = Args::new(&["-a"]).text("-d", &self.data_directory);
        ExternalCommand::new(utility_path(gphome, "gpstart"), args.0).sourced(gphome)
    }
}

/// Runs a remote command on a set of hosts through `gpssh`
#[derive(Debug, Clone, Default)]
pub struct GpSsh {
    pub hosts: Vec<String>,
    pub command: Vec<String>,
}

impl CommandBuilder for GpSsh {
    fn build(&self, gphome: &Path) -> ExternalCommand {
        let mut args = Vec::new();
        for host in &self.hosts {
            args.push("-h".to_string());
            args.push(host.clone());
        }
        args.extend(self.command.iter().cloned());
        ExternalCommand::new(utility_path(gphome, "gpssh"), args).sourced(gphome)
    }
}

/// Capability for executing external commands
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion; returns stdout, or an error carrying stderr
    async fn run(&self, command: &ExternalCommand) -> Result<String>;

    /// Run to completion, sending each stdout line to `output` as it arrives.
    ///
    /// The sender is dropped when the command exits, which ends the receiver.
    async fn run_streaming(&self, command: &ExternalCommand, output: mpsc::Sender<String>) -> Result<()>;
}

/// [`CommandRunner`] backed by real OS processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    fn command(command: &ExternalCommand) -> tokio::process::Command {
        let (program, args) = command.argv();
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }
}

fn failure_output(stdout: &str, stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.to_string()
    }
}

#[async_trait::async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &ExternalCommand) -> Result<String> {
        debug!("Executing command: {}", command);

        let output = Self::command(command).output().await.map_err(|e| GpError::Command {
            command: command.name(),
            output: e.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GpError::Command {
                command: command.name(),
                output: format!("{} ({})", failure_output(&stdout, &stderr), output.status),
            });
        }

        Ok(stdout)
    }

    async fn run_streaming(&self, command: &ExternalCommand, output: mpsc::Sender<String>) -> Result<()> {
        debug!("Executing command: {}", command);

        let mut child = Self::command(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| GpError::Command {
                command: command.name(),
                output: e.to_string(),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GpError::internal("child stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| GpError::internal("child stderr was not captured"))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut forwarding = true;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            if !buf.ends_with(b"\n") {
                buf.push(b'\n');
            }
            // Drain the pipe even after the receiver is gone
            if forwarding && output.send(String::from_utf8_lossy(&buf).into_owned()).await.is_err() {
                warn!("Output receiver for {} closed", command.name());
                forwarding = false;
            }
        }
        drop(output);

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(GpError::Command {
                command: command.name(),
                output: format!("{} ({})", failure_output("", &stderr), status),
            });
        }

        Ok(())
    }
}
