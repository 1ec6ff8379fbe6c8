use std::fmt;

/// Result alias used across the workspace
pub type Result<T> = std::result::Result<T, GpError>;

/// Errors raised by the hub, the agents and the tooling around them
#[derive(Debug, thiserror::Error)]
pub enum GpError {
    /// A host is not in a state where the operation may proceed
    /// (non-empty data directory, root user, missing binary permissions)
    #[error("precondition failed: {message}")]
    Precondition { message: String },

    #[error("could not connect to agent on host {host}: {message}")]
    Connectivity { host: String, message: String },

    #[error("unreachable hosts: {}", .hosts.join(","))]
    UnreachableHosts { hosts: Vec<String> },

    #[error("unready hosts: {}", .hosts.join(","))]
    UnreadyHosts { hosts: Vec<String> },

    #[error("host {host}: {message}")]
    Remote { host: String, message: String },

    #[error("executing {command}: {output}")]
    Command { command: String, output: String },

    #[error("catalog error: {message}")]
    Catalog { message: String },

    /// A system table was left in a modified state and needs operator follow-up
    #[error("catalog left inconsistent: {message}")]
    CatalogInconsistency { message: String },

    #[error("invalid cluster specification: {message}")]
    InvalidSpec { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Fanout(#[from] FanoutError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GpError {
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition { message: message.into() }
    }

    pub fn remote(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            host: host.into(),
            message: message.into(),
        }
    }

    pub fn catalog(message: impl fmt::Display) -> Self {
        Self::Catalog { message: message.to_string() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Hosts named by this error, if any
    pub fn hosts(&self) -> Vec<&str> {
        match self {
            GpError::Connectivity { host, .. } | GpError::Remote { host, .. } => vec![host.as_str()],
            GpError::UnreachableHosts { hosts } | GpError::UnreadyHosts { hosts } => {
                hosts.iter().map(String::as_str).collect()
            }
            GpError::Fanout(fanout) => fanout.hosts(),
            _ => Vec::new(),
        }
    }
}

impl From<serde_json::Error> for GpError {
    fn from(e: serde_json::Error) -> Self {
        GpError::Serialization(e.to_string())
    }
}

/// One failed unit of a fan-out, tagged with the host that ran it
#[derive(Debug)]
pub struct HostFailure {
    pub host: String,
    pub error: GpError,
}

impl fmt::Display for HostFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

/// Joined failures of a fan-out, in connection order
#[derive(Debug, Default)]
pub struct FanoutError {
    pub failures: Vec<HostFailure>,
}

impl FanoutError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, host: impl Into<String>, error: GpError) {
        self.failures.push(HostFailure {
            host: host.into(),
            error,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn hosts(&self) -> Vec<&str> {
        let mut hosts: Vec<&str> = Vec::new();
        for failure in &self.failures {
            if !hosts.contains(&failure.host.as_str()) {
                hosts.push(&failure.host);
            }
        }
        hosts
    }

    /// `Ok(())` when nothing failed, the joined error otherwise
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(GpError::Fanout(self))
        }
    }
}

impl fmt::Display for FanoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.failures.iter().map(|f| f.to_string()).collect();
        write!(f, "{}", messages.join("\n"))
    }
}

impl std::error::Error for FanoutError {}
