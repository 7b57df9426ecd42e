//! Immutable application versions.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use berth_id::{AppId, VersionId};
use berth_proto::DockerNetwork;
use berth_reconcile::DEFAULT_MAX_FAILOVERS;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::offer::Constraint;

/// Snapshot of an application's desired shape.
///
/// Versions are never edited; a new one is appended to the application's
/// history instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub app_id: AppId,
    #[serde(default)]
    pub previous_version_id: Option<VersionId>,
    #[serde(default)]
    pub command: Option<String>,
    pub cpus: f64,
    pub mem: f64,
    #[serde(default)]
    pub disk: f64,
    pub instances: u32,
    #[serde(default)]
    pub run_as: Option<String>,
    #[serde(default)]
    pub container: Option<ContainerSpec>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub health_checks: Vec<HealthCheckSpec>,
    #[serde(default)]
    pub kill_policy: Option<KillPolicySpec>,
    #[serde(default)]
    pub update_policy: UpdatePolicy,
    /// Placement constraints, `attribute:OPERATOR[:value]`.
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub uris: Vec<String>,
    /// Pinned addresses for fixed-mode applications.
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(skip)]
    pub placement: Placement,
}

/// `constraints` parsed on first use. `None` once any of them failed to
/// parse, which makes the version unplaceable.
#[derive(Debug, Clone, Default)]
pub struct Placement(OnceLock<Option<Vec<Constraint>>>);

/// Derived from `constraints`, so it never makes two versions differ.
impl PartialEq for Placement {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Version {
    /// Number of host ports a launch of this version must reserve.
    ///
    /// Only bridged containers map container ports onto host ports.
    pub fn required_host_ports(&self) -> usize {
        match &self.container {
            Some(ContainerSpec {
                docker: Some(docker),
                ..
            }) if docker.network == DockerNetwork::Bridge => docker.port_mappings.len(),
            _ => 0,
        }
    }

    pub fn max_failovers(&self) -> u32 {
        self.update_policy.max_failovers
    }

    /// Parsed placement constraints, compiled once per version.
    pub fn placement(&self) -> Option<&[Constraint]> {
        self.placement
            .0
            .get_or_init(|| {
                self.constraints
                    .iter()
                    .map(|raw| Constraint::parse(raw))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| {
                        warn!(version_id = %self.id, error = %e, "Version has an unparseable constraint; it will not be placed");
                    })
                    .ok()
            })
            .as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    #[serde(default)]
    pub docker: Option<DockerSpec>,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerSpec {
    pub image: String,
    #[serde(default)]
    pub network: DockerNetwork,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub port_mappings: Vec<PortMappingSpec>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub force_pull_image: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMappingSpec {
    pub container_port: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub container_path: String,
    #[serde(default)]
    pub host_path: Option<String>,
    /// `RW` or `RO`.
    #[serde(default = "default_volume_mode")]
    pub mode: String,
}

fn default_volume_mode() -> String {
    "RW".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckProtocol {
    Http,
    Tcp,
    Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    pub protocol: HealthCheckProtocol,
    /// Index into the version's port mappings.
    #[serde(default)]
    pub port_index: usize,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub interval_seconds: Option<f64>,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub grace_period_seconds: Option<f64>,
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillPolicySpec {
    /// Grace period before the task is forcibly killed.
    pub duration_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePolicy {
    #[serde(default)]
    pub update_delay_secs: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_max_failovers")]
    pub max_failovers: u32,
    #[serde(default)]
    pub action: Option<String>,
}

fn default_max_failovers() -> u32 {
    DEFAULT_MAX_FAILOVERS
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            update_delay_secs: 0,
            max_retries: 0,
            max_failovers: DEFAULT_MAX_FAILOVERS,
            action: None,
        }
    }
}
