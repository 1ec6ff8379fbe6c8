//! Rewriting of the configuration files that initdb leaves in a data directory.

use gpctl_common::Result;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

pub const POSTGRESQL_CONF: &str = "postgresql.conf";
pub const INTERNAL_AUTO_CONF: &str = "internal.auto.conf";
pub const PG_HBA_CONF: &str = "pg_hba.conf";

/// Numbers go in bare, anything else is single-quoted
pub fn quote_value(value: &str) -> String {
    if value.parse::<f64>().is_ok() {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "''"))
    }
}

/// Does `line` assign `key`, i.e. `key = ...` or `key ...`
fn assigns_key(line: &str, key: &str) -> bool {
    match line.strip_prefix(key) {
        Some(rest) => rest.starts_with(|c: char| c.is_whitespace() || c == '='),
        None => false,
    }
}

/// Apply `params` to the contents of a postgresql.conf-style file.
///
/// The first line assigning a key is replaced by the new value; unless
/// `overwrite` is set, the old line is kept as a comment above it. Keys not
/// found in the file are appended in key order.
pub fn apply_parameters(contents: &str, params: &HashMap<String, String>, overwrite: bool) -> String {
    let mut pending: BTreeMap<&str, &str> = params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let mut out: Vec<String> = Vec::new();
    for line in contents.lines() {
        let matched = pending.keys().copied().find(|key| assigns_key(line, key));
        match matched {
            Some(key) => {
                if !overwrite {
                    out.push(format!("#{}", line));
                }
                let value = pending.remove(key).unwrap_or_default();
                out.push(format!("{} = {}", key, quote_value(value)));
            }
            None => out.push(line.to_string()),
        }
    }

    for (key, value) in pending {
        out.push(format!("{} = {}", key, quote_value(value)));
    }

    let mut result = out.join("\n");
    result.push('\n');
    result
}

pub async fn update_postgresql_conf(
    data_dir: &Path,
    params: &HashMap<String, String>,
    overwrite: bool,
) -> Result<()> {
    let path = data_dir.join(POSTGRESQL_CONF);
    let contents = tokio::fs::read_to_string(&path).await?;
    tokio::fs::write(&path, apply_parameters(&contents, params, overwrite)).await?;
    debug!("Updated {} with {} parameters", path.display(), params.len());
    Ok(())
}

/// Record the catalog dbid of the instance
pub async fn create_internal_conf(data_dir: &Path, dbid: i32) -> Result<()> {
    let path = data_dir.join(INTERNAL_AUTO_CONF);
    tokio::fs::write(&path, format!("gp_dbid = {}\n", dbid)).await?;
    Ok(())
}

fn host_line(database: &str, user: &str, address: &str) -> String {
    format!("host\t{}\t{}\t{}\ttrust", database, user, address)
}

fn push_unique(lines: &mut Vec<String>, line: String) {
    if !lines.contains(&line) {
        lines.push(line);
    }
}

/// Access rules of the coordinator.
///
/// Only the comments of the generated file are kept; the user gets ident
/// access locally and trust access from localhost and from `addresses`, for
/// both regular and replication connections.
pub fn coordinator_hba(contents: &str, user: &str, addresses: &[String]) -> String {
    let mut lines: Vec<String> = contents
        .lines()
        .filter(|line| line.trim_start().starts_with('#'))
        .map(str::to_string)
        .collect();

    push_unique(&mut lines, format!("local\tall\t{}\tident", user));
    push_unique(&mut lines, host_line("all", user, "localhost"));
    for addr in addresses {
        push_unique(&mut lines, host_line("all", user, addr));
    }

    push_unique(&mut lines, format!("local\treplication\t{}\tident", user));
    push_unique(&mut lines, host_line("replication", user, "samehost"));
    for addr in addresses {
        push_unique(&mut lines, host_line("replication", user, addr));
    }

    let mut result = lines.join("\n");
    result.push('\n');
    result
}

/// Access rules of a primary segment: the generated file plus trust for
/// every coordinator address and for the segment's own addresses
pub fn segment_hba(
    contents: &str,
    user: &str,
    coordinator_addresses: &[String],
    addresses: &[String],
) -> String {
    let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();

    for addr in coordinator_addresses {
        push_unique(&mut lines, host_line("all", "all", addr));
    }
    for addr in addresses {
        push_unique(&mut lines, host_line("all", user, addr));
    }

    let mut result = lines.join("\n");
    result.push('\n');
    result
}

pub async fn update_coordinator_hba(data_dir: &Path, user: &str, addresses: &[String]) -> Result<()> {
    let path = data_dir.join(PG_HBA_CONF);
    let contents = tokio::fs::read_to_string(&path).await?;
    tokio::fs::write(&path, coordinator_hba(&contents, user, addresses)).await?;
    Ok(())
}

pub async fn update_segment_hba(
    data_dir: &Path,
    user: &str,
    coordinator_addresses: &[String],
    addresses: &[String],
) -> Result<()> {
    let path = data_dir.join(PG_HBA_CONF);
    let contents = tokio::fs::read_to_string(&path).await?;
    tokio::fs::write(
        &path,
        segment_hba(&contents, user, coordinator_addresses, addresses),
    )
    .await?;
    Ok(())
}
