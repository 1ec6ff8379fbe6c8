use crate::constants::*;
use crate::error::{GpError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

/// TLS material shared by the hub and the agents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    #[serde(default)]
    pub server_cert: Option<PathBuf>,
    #[serde(default)]
    pub server_key: Option<PathBuf>,
    #[serde(default)]
    pub client_cert: Option<PathBuf>,
    #[serde(default)]
    pub client_key: Option<PathBuf>,
    /// Plaintext transport, for development clusters only
    #[serde(default)]
    pub insecure: bool,
}

impl Credentials {
    pub fn insecure() -> Self {
        Self {
            insecure: true,
            ..Default::default()
        }
    }

    /// URI scheme matching the transport security
    pub fn scheme(&self) -> &'static str {
        if self.insecure {
            "http"
        } else {
            "https"
        }
    }

    /// Server-side TLS config, `None` when running insecure
    pub fn load_server_tls(&self) -> Result<Option<ServerTlsConfig>> {
        if self.insecure {
            return Ok(None);
        }

        let cert = read_pem(self.server_cert.as_deref(), "server_cert")?;
        let key = read_pem(self.server_key.as_deref(), "server_key")?;
        let mut tls = ServerTlsConfig::new().identity(Identity::from_pem(cert, key));

        if let Some(ca) = self.ca_cert.as_deref() {
            tls = tls.client_ca_root(Certificate::from_pem(read_pem(Some(ca), "ca_cert")?));
        }

        Ok(Some(tls))
    }

    /// Client-side TLS config, `None` when running insecure
    pub fn load_client_tls(&self) -> Result<Option<ClientTlsConfig>> {
        if self.insecure {
            return Ok(None);
        }

        let ca = read_pem(self.ca_cert.as_deref(), "ca_cert")?;
        let mut tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(ca));

        if let (Some(cert), Some(key)) = (self.client_cert.as_deref(), self.client_key.as_deref()) {
            tls = tls.identity(Identity::from_pem(
                read_pem(Some(cert), "client_cert")?,
                read_pem(Some(key), "client_key")?,
            ));
        }

        Ok(Some(tls))
    }
}

fn read_pem(path: Option<&Path>, name: &str) -> Result<Vec<u8>> {
    let path = path.ok_or_else(|| GpError::Config {
        message: format!("credentials: {} is not set", name),
    })?;

    std::fs::read(path).map_err(|e| GpError::Config {
        message: format!("could not read {} {}: {}", name, path.display(), e),
    })
}

/// Hub configuration, written once at install time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_hub_port")]
    pub hub_port: u16,
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,
    #[serde(default)]
    pub hostnames: Vec<String>,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    pub gphome: PathBuf,
    /// Database superuser; the invoking OS user when unset
    #[serde(default)]
    pub superuser: Option<String>,
    #[serde(default)]
    pub credentials: Credentials,
}

fn default_hub_port() -> u16 {
    DEFAULT_HUB_PORT
}

fn default_agent_port() -> u16 {
    DEFAULT_AGENT_PORT
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_DIR)
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

impl HubConfig {
    pub fn new(gphome: impl Into<PathBuf>, hostnames: Vec<String>) -> Self {
        Self {
            hub_port: DEFAULT_HUB_PORT,
            agent_port: DEFAULT_AGENT_PORT,
            hostnames,
            log_dir: default_log_dir(),
            service_name: default_service_name(),
            gphome: gphome.into(),
            superuser: None,
            credentials: Credentials::default(),
        }
    }

    /// Load from a JSON file, with `GPCTL_*` environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: HubConfig = load_layered(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hub_port == 0 || self.agent_port == 0 {
            return Err(GpError::Config {
                message: "hub_port and agent_port must be non-zero".to_string(),
            });
        }
        if self.hub_port == self.agent_port {
            return Err(GpError::Config {
                message: format!("hub and agent cannot share port {}", self.hub_port),
            });
        }
        if self.hostnames.is_empty() {
            return Err(GpError::Config {
                message: "at least one hostname is required".to_string(),
            });
        }
        if self.hostnames.iter().any(|h| h.trim().is_empty()) {
            return Err(GpError::Config {
                message: "hostnames cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Superuser whose password is set at the end of MakeCluster
    pub fn database_superuser(&self) -> Result<String> {
        if let Some(user) = &self.superuser {
            return Ok(user.clone());
        }
        std::env::var("USER").map_err(|_| GpError::Config {
            message: "superuser is not configured and USER is not set".to_string(),
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Agent configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    pub gphome: PathBuf,
    #[serde(default)]
    pub credentials: Credentials,
}

impl AgentConfig {
    /// Agents read the same file as the hub and keep the fields they need
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: AgentConfig = load_layered(path.as_ref())?;
        if config.agent_port == 0 {
            return Err(GpError::Config {
                message: "agent_port must be non-zero".to_string(),
            });
        }
        Ok(config)
    }
}

impl From<&HubConfig> for AgentConfig {
    fn from(hub: &HubConfig) -> Self {
        Self {
            agent_port: hub.agent_port,
            service_name: hub.service_name.clone(),
            gphome: hub.gphome.clone(),
            credentials: hub.credentials.clone(),
        }
    }
}

fn load_layered<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Json))
        .add_source(
            config::Environment::with_prefix("GPCTL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| GpError::Config {
            message: format!("could not read {}: {}", path.display(), e),
        })?;

    settings.try_deserialize().map_err(|e| GpError::Config {
        message: format!("invalid configuration in {}: {}", path.display(), e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_hub_config_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gp.json");
        std::fs::write(
            &path,
            r#"{"gphome": "/usr/local/gpdb", "hostnames": ["cdw", "sdw1"], "credentials": {"insecure": true}}"#,
        )
        .unwrap();

        let config = HubConfig::load(&path).unwrap();
        assert_eq!(config.hub_port, DEFAULT_HUB_PORT);
        assert_eq!(config.agent_port, DEFAULT_AGENT_PORT);
        assert_eq!(config.hostnames, vec!["cdw", "sdw1"]);
        assert_eq!(config.service_name, "gp");
        assert!(config.credentials.insecure);
    }

    #[test]
    fn test_config_round_trips_through_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gp.json");
        let mut config = HubConfig::new("/usr/local/gpdb", vec!["cdw".to_string()]);
        config.hub_port = 5000;
        config.save(&path).unwrap();

        let loaded = HubConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_shared_port_is_rejected() {
        let mut config = HubConfig::new("/usr/local/gpdb", vec!["cdw".to_string()]);
        config.agent_port = config.hub_port;
        assert!(matches!(config.validate(), Err(GpError::Config { .. })));
    }

    #[test]
    fn test_insecure_credentials_skip_tls() {
        let creds = Credentials::insecure();
        assert!(creds.load_server_tls().unwrap().is_none());
        assert!(creds.load_client_tls().unwrap().is_none());
        assert_eq!(creds.scheme(), "http");
    }

    #[test]
    fn test_missing_certificate_is_a_config_error() {
        let creds = Credentials::default();
        assert!(matches!(creds.load_server_tls(), Err(GpError::Config { .. })));
    }
}
