//! Applications and their creation specs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use berth_id::{AppId, VersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::offer::Constraint;
use super::slot::{Slot, SlotKey, SlotState};
use super::StateError;
use super::version::{
    ContainerSpec, HealthCheckSpec, KillPolicySpec, Placement, UpdatePolicy, Version,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    /// Some slots have not reached running yet.
    Creating,
    Normal,
    /// Slots are being torn down; removed once all are terminated.
    Deleting,
}

impl AppState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppState::Creating => "creating",
            AppState::Normal => "normal",
            AppState::Deleting => "deleting",
        }
    }
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Placement mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppMode {
    /// Instances may land on any agent.
    #[default]
    Replicates,
    /// Instances keep their agent and pinned addresses.
    Fixed,
}

/// Request to create an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSpec {
    pub name: String,
    #[serde(default)]
    pub mode: AppMode,
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
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub uris: Vec<String>,
    #[serde(default)]
    pub ips: Vec<String>,
}

impl AppSpec {
    pub fn new(name: impl Into<String>, cpus: f64, mem: f64, instances: u32) -> Self {
        Self {
            name: name.into(),
            mode: AppMode::default(),
            command: None,
            cpus,
            mem,
            disk: 0.0,
            instances,
            run_as: None,
            container: None,
            labels: BTreeMap::new(),
            env: BTreeMap::new(),
            health_checks: Vec::new(),
            kill_policy: None,
            update_policy: UpdatePolicy::default(),
            constraints: Vec::new(),
            uris: Vec::new(),
            ips: Vec::new(),
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    /// Reject specs that could never be placed or named.
    ///
    /// Names end up inside task names, which are split on `.`.
    pub fn validate(&self) -> Result<(), StateError> {
        let invalid = |reason: String| Err(StateError::InvalidSpec(reason));

        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return invalid(format!("name {:?} must be non-empty [A-Za-z0-9_-]", self.name));
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.cpus) || !positive(self.mem) || self.disk < 0.0 {
            return invalid(format!(
                "resources must be positive (cpus {}, mem {}, disk {})",
                self.cpus, self.mem, self.disk
            ));
        }
        if self.command.is_none() && self.container.as_ref().and_then(|c| c.docker.as_ref()).is_none() {
            return invalid("either a command or a docker image is required".to_string());
        }
        for constraint in &self.constraints {
            Constraint::parse(constraint)?;
        }
        Ok(())
    }

    fn into_version(self, app_id: AppId) -> Version {
        Version {
            id: VersionId::new(),
            app_id,
            previous_version_id: None,
            command: self.command,
            cpus: self.cpus,
            mem: self.mem,
            disk: self.disk,
            instances: self.instances,
            run_as: self.run_as,
            container: self.container,
            labels: self.labels,
            env: self.env,
            health_checks: self.health_checks,
            kill_policy: self.kill_policy,
            update_policy: self.update_policy,
            constraints: self.constraints,
            uris: self.uris,
            ips: self.ips,
            placement: Placement::default(),
        }
    }
}

/// A declared workload and its slots.
#[derive(Debug, Clone)]
pub struct Application {
    pub id: AppId,
    pub name: String,
    pub state: AppState,
    pub mode: AppMode,
    pub current_version: Arc<Version>,
    pub proposed_version: Option<Arc<Version>>,
    /// Version history, oldest first. Includes the current version.
    pub versions: Vec<Arc<Version>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub slots: BTreeMap<u32, Slot>,
}

impl Application {
    /// Build a new application with one pending slot per instance.
    pub fn from_spec(spec: AppSpec) -> Self {
        let id = AppId::new();
        let name = spec.name.clone();
        let mode = spec.mode;
        let version = Arc::new(spec.into_version(id));

        let slots = (0..version.instances)
            .map(|index| {
                let key = SlotKey::new(id, index);
                (index, Slot::new(key, Arc::clone(&version)))
            })
            .collect();

        let now = Utc::now();
        Self {
            id,
            name,
            state: AppState::Creating,
            mode,
            current_version: Arc::clone(&version),
            proposed_version: None,
            versions: vec![version],
            created_at: now,
            updated_at: now,
            slots,
        }
    }

    pub fn slot(&self, index: u32) -> Option<&Slot> {
        self.slots.get(&index)
    }

    pub fn slot_mut(&mut self, index: u32) -> Option<&mut Slot> {
        self.slots.get_mut(&index)
    }

    pub fn version(&self, id: &VersionId) -> Option<&Arc<Version>> {
        self.versions.iter().find(|v| &v.id == id)
    }

    pub fn all_slots_in(&self, state: SlotState) -> bool {
        self.slots.values().all(|s| s.state == state)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> AppSummary {
        let mut slot_states: HashMap<SlotState, usize> = HashMap::new();
        for slot in self.slots.values() {
            *slot_states.entry(slot.state).or_default() += 1;
        }
        AppSummary {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            instances: self.current_version.instances,
            slot_states,
        }
    }
}

/// Listing view of an application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppSummary {
    pub id: AppId,
    pub name: String,
    pub state: AppState,
    pub instances: u32,
    pub slot_states: HashMap<SlotState, usize>,
}

impl AppSummary {
    pub fn count(&self, state: SlotState) -> usize {
        self.slot_states.get(&state).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_spec_creates_pending_slots() {
        let app = Application::from_spec(AppSpec::new("web", 0.5, 128.0, 3));

        assert_eq!(app.state, AppState::Creating);
        assert_eq!(app.slots.len(), 3);
        assert!(app.all_slots_in(SlotState::PendingOffer));
        assert_eq!(app.versions.len(), 1);
        assert_eq!(app.current_version.app_id, app.id);

        let slot = app.slot(2).unwrap();
        assert_eq!(slot.key, SlotKey::new(app.id, 2));
        assert!(Arc::ptr_eq(&slot.version, &app.current_version));
    }

    #[test]
    fn test_validate() {
        let ok = AppSpec::new("web-1", 0.5, 128.0, 2).with_command("sleep 10");
        assert!(ok.validate().is_ok());

        let cases = [
            AppSpec::new("web.1", 0.5, 128.0, 1).with_command("x"),
            AppSpec::new("", 0.5, 128.0, 1).with_command("x"),
            AppSpec::new("web", 0.0, 128.0, 1).with_command("x"),
            AppSpec::new("web", 0.5, f64::NAN, 1).with_command("x"),
            AppSpec::new("web", 0.5, 128.0, 1),
            AppSpec::new("web", 0.5, 128.0, 1)
                .with_command("x")
                .with_constraint("rack:NEAR:r1"),
        ];
        for spec in cases {
            assert!(spec.validate().is_err(), "{spec:?}");
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut app = Application::from_spec(AppSpec::new("web", 0.5, 128.0, 2));
        app.slot_mut(0).unwrap().state = SlotState::Running;

        let summary = app.summary();
        assert_eq!(summary.count(SlotState::Running), 1);
        assert_eq!(summary.count(SlotState::PendingOffer), 1);
        assert_eq!(summary.count(SlotState::Killing), 0);
    }
}
