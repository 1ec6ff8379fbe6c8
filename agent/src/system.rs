use gpctl_common::{GpError, Result};
use std::collections::BTreeSet;
use std::net::IpAddr;

/// OS facts the agent depends on, injectable for tests
#[async_trait::async_trait]
pub trait HostSystem: Send + Sync {
    fn effective_uid(&self) -> u32;

    fn effective_gid(&self) -> u32;

    /// Login name of the user running the agent
    fn current_user(&self) -> Result<String>;

    /// Addresses of `hostname` in CIDR form, as used by pg_hba.conf
    async fn host_addresses(&self, hostname: &str) -> Result<Vec<String>>;
}

/// [`HostSystem`] backed by the local machine
#[derive(Debug, Clone, Default)]
pub struct LocalSystem;

#[async_trait::async_trait]
impl HostSystem for LocalSystem {
    fn effective_uid(&self) -> u32 {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() }
    }

    fn effective_gid(&self) -> u32 {
        // SAFETY: getegid has no preconditions and cannot fail
        unsafe { libc::getegid() }
    }

    fn current_user(&self) -> Result<String> {
        std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .map_err(|_| GpError::internal("could not determine the current user"))
    }

    async fn host_addresses(&self, hostname: &str) -> Result<Vec<String>> {
        let resolved = tokio::net::lookup_host((hostname, 0)).await.map_err(|e| {
            GpError::internal(format!("could not resolve addresses of {}: {}", hostname, e))
        })?;

        let addrs: BTreeSet<String> = resolved.map(|addr| cidr(addr.ip())).collect();
        Ok(addrs.into_iter().collect())
    }
}

fn cidr(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{}/32", v4),
        IpAddr::V6(v6) => format!("{}/128", v6),
    }
}
