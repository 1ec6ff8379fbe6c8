use crate::system::HostSystem;
use gpctl_common::{utility_path, GpError, Result};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::{info, warn};

/// Check that this host can receive new segments in `directories`.
///
/// Refuses to run as root. Non-empty directories are an error unless
/// `forced`, in which case they are removed. Finally checks that initdb
/// under `gphome` can be executed by the current user.
pub async fn validate_host_env(
    system: &dyn HostSystem,
    gphome: &Path,
    directories: &[String],
    forced: bool,
) -> Result<()> {
    let uid = system.effective_uid();
    if uid == 0 {
        return Err(GpError::precondition(
            "cannot create a cluster as the root user",
        ));
    }

    let non_empty = non_empty_directories(directories).await;
    if !non_empty.is_empty() {
        if !forced {
            return Err(GpError::precondition(format!(
                "directory not empty: {}",
                non_empty.join(", ")
            )));
        }

        for dir in &non_empty {
            info!("Removing existing data directory {}", dir);
            tokio::fs::remove_dir_all(dir).await.map_err(|e| {
                GpError::precondition(format!("could not remove directory {}: {}", dir, e))
            })?;
        }
    }

    let initdb = utility_path(gphome, "initdb");
    check_executable(&initdb, uid, system.effective_gid()).await
}

/// Directories of `directories` that hold at least one entry. A directory
/// that cannot be read is reported as non-empty.
pub async fn non_empty_directories(directories: &[String]) -> Vec<String> {
    let mut non_empty = Vec::new();
    for dir in directories {
        match is_empty_dir(Path::new(dir)).await {
            Ok(true) => {}
            Ok(false) => non_empty.push(dir.clone()),
            Err(e) => {
                warn!("Could not inspect directory {}: {}", dir, e);
                non_empty.push(dir.clone());
            }
        }
    }
    non_empty
}

async fn is_empty_dir(dir: &Path) -> std::io::Result<bool> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };
    Ok(entries.next_entry().await?.is_none())
}

async fn check_executable(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        GpError::precondition(format!("could not access {}: {}", path.display(), e))
    })?;

    let mode = metadata.mode();
    let executable = if metadata.uid() == uid {
        mode & 0o100 != 0
    } else if metadata.gid() == gid {
        mode & 0o010 != 0
    } else {
        return Err(GpError::precondition(format!(
            "file {} is neither owned by the user nor by the group",
            path.display()
        )));
    };

    if !executable {
        return Err(GpError::precondition(format!(
            "file {} does not have execute permissions",
            path.display()
        )));
    }

    Ok(())
}
