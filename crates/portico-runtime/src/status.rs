use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
}

impl ContainerState {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "restarting" => ContainerState::Restarting,
            "paused" => ContainerState::Paused,
            "dead" => ContainerState::Dead,
            "exited" => ContainerState::Exited,
            other => {
                debug!("unrecognized container state '{other}', treating as exited");
                ContainerState::Exited
            }
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Created => write!(f, "created"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Restarting => write!(f, "restarting"),
            ContainerState::Paused => write!(f, "paused"),
            ContainerState::Exited => write!(f, "exited"),
            ContainerState::Dead => write!(f, "dead"),
        }
    }
}

/// Health as reported by the container's healthcheck. `None` means the
/// container declares no healthcheck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    None,
    Starting,
    Healthy,
    Unhealthy,
}

impl HealthState {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "starting" => HealthState::Starting,
            "healthy" => HealthState::Healthy,
            "unhealthy" => HealthState::Unhealthy,
            _ => HealthState::None,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::None => write!(f, "-"),
            HealthState::Starting => write!(f, "starting"),
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_ip: String,
    pub published: u16,
    pub target: u16,
    pub protocol: String,
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.published == 0 {
            write!(f, "{}/{}", self.target, self.protocol)
        } else {
            write!(
                f,
                "{}:{}->{}/{}",
                self.host_ip, self.published, self.target, self.protocol
            )
        }
    }
}

/// Snapshot of one compose service, re-read on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRuntimeStatus {
    pub service_name: String,
    pub state: ContainerState,
    pub health: HealthState,
    pub ports: Vec<PortMapping>,
}

impl ServiceRuntimeStatus {
    /// Running, and healthy when a healthcheck is declared.
    pub fn is_ready(&self) -> bool {
        self.state == ContainerState::Running
            && matches!(self.health, HealthState::None | HealthState::Healthy)
    }
}

#[derive(Debug, Deserialize)]
struct RawPsEntry {
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Health", default)]
    health: String,
    #[serde(rename = "Publishers", default)]
    publishers: Option<Vec<RawPublisher>>,
}

#[derive(Debug, Deserialize)]
struct RawPublisher {
    #[serde(rename = "URL", default)]
    url: String,
    #[serde(rename = "TargetPort", default)]
    target_port: u16,
    #[serde(rename = "PublishedPort", default)]
    published_port: u16,
    #[serde(rename = "Protocol", default)]
    protocol: String,
}

impl From<RawPsEntry> for ServiceRuntimeStatus {
    fn from(raw: RawPsEntry) -> Self {
        let mut ports: Vec<PortMapping> = raw
            .publishers
            .unwrap_or_default()
            .into_iter()
            .map(|p| PortMapping {
                host_ip: p.url,
                published: p.published_port,
                target: p.target_port,
                protocol: if p.protocol.is_empty() {
                    "tcp".to_owned()
                } else {
                    p.protocol
                },
            })
            .collect();
        ports.dedup();
        Self {
            service_name: raw.service,
            state: ContainerState::parse(&raw.state),
            health: HealthState::parse(&raw.health),
            ports,
        }
    }
}

/// Parse `compose ps --format json` output.
///
/// Older compose releases print one JSON array; newer ones print one JSON
/// object per line. Both are accepted.
pub fn parse_ps_output(output: &str) -> Result<Vec<ServiceRuntimeStatus>, RuntimeError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<RawPsEntry> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| RuntimeError::StatusParse(e.to_string()))?
    } else {
        trimmed
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| RuntimeError::StatusParse(e.to_string()))
            })
            .collect::<Result<_, _>>()?
    };

    let mut statuses: Vec<ServiceRuntimeStatus> =
        entries.into_iter().map(ServiceRuntimeStatus::from).collect();
    statuses.sort_by(|a, b| a.service_name.cmp(&b.service_name));
    Ok(statuses)
}
