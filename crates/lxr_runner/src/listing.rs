//! Parsers for the tabular listings printed by `pct` and `pveam`.
//!
//! Every listing starts with a header line which is discarded. Columns are
//! whitespace separated; each record type below documents its column mapping.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ToolError, ToolResult};

/// Lifecycle status reported by `pct list` / `pct status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    /// Any other status string the tool reports.
    Other(String),
}

impl ContainerStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

/// One row of `pct list`.
///
/// Columns: `VMID Status [Lock] Name`. The lock column is only populated
/// while an operation holds the container lock, so rows have three or four
/// fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: u32,
    pub status: ContainerStatus,
    pub lock: Option<String>,
    pub name: String,
}

/// One row of `pveam list <storage>`. Columns: `NAME SIZE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalImage {
    /// Fully qualified key, e.g. `local:vztmpl/debian-12-standard_12.2-1_amd64.tar.zst`
    pub key: String,
    pub size: Option<String>,
}

/// One row of `pveam available`. Columns: `SECTION TEMPLATE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub section: String,
    pub template: String,
}

fn data_lines(output: &str) -> impl Iterator<Item = &str> {
    output
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
}

fn malformed(listing: &'static str, line: &str) -> ToolError {
    ToolError::MalformedListing {
        listing,
        line: line.to_string(),
    }
}

/// Parse the output of `pct list`.
pub fn parse_container_list(output: &str) -> ToolResult<Vec<ContainerRecord>> {
    data_lines(output)
        .map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let (id, status, lock, name) = match parts.as_slice() {
                [id, status, name] => (id, status, None, name),
                [id, status, lock, name] => (id, status, Some(lock.to_string()), name),
                _ => return Err(malformed("container", line)),
            };
            let id = id.parse().map_err(|_| malformed("container", line))?;

            Ok(ContainerRecord {
                id,
                status: ContainerStatus::parse(status),
                lock,
                name: name.to_string(),
            })
        })
        .collect()
}

/// Parse the output of `pveam list <storage>`.
pub fn parse_image_list(output: &str) -> ToolResult<Vec<LocalImage>> {
    data_lines(output)
        .map(|line| {
            let mut parts = line.split_whitespace();
            let key = parts.next().ok_or_else(|| malformed("image", line))?;
            Ok(LocalImage {
                key: key.to_string(),
                size: parts.next().map(str::to_string),
            })
        })
        .collect()
}

/// Parse the output of `pveam available`.
pub fn parse_catalog(output: &str) -> ToolResult<Vec<CatalogEntry>> {
    data_lines(output)
        .map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                [section, template, ..] => Ok(CatalogEntry {
                    section: section.to_string(),
                    template: template.to_string(),
                }),
                _ => Err(malformed("catalog", line)),
            }
        })
        .collect()
}

/// Parse the output of `pct status <id>` (`status: running`).
pub fn parse_status(output: &str) -> ToolResult<ContainerStatus> {
    let line = output
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| malformed("status", output))?;

    match line.split_whitespace().collect::<Vec<_>>().as_slice() {
        ["status:", value] => Ok(ContainerStatus::parse(value)),
        _ => Err(malformed("status", line)),
    }
}
