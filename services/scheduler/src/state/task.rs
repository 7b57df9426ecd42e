//! Tasks: individual launch attempts of a slot.

use berth_id::{AppId, TaskId, VersionId};
use berth_proto::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one launch attempt, following the cluster manager's task states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Staging,
    Starting,
    Running,
    Killing,
    Finished,
    Failed,
    Killed,
    Error,
    Lost,
    Dropped,
    Unreachable,
    Gone,
    GoneByOperator,
    Unknown,
}

impl TaskStatus {
    /// Monotonic rank; an update with a lower rank than the recorded status
    /// is stale.
    ///
    /// `Unreachable` and `Unknown` sit between running and terminal: the
    /// task may still come back as running, so they never outrank it.
    pub fn rank(&self) -> u8 {
        match self {
            TaskStatus::Staging => 0,
            TaskStatus::Starting => 1,
            TaskStatus::Running | TaskStatus::Unreachable | TaskStatus::Unknown => 2,
            TaskStatus::Killing => 3,
            TaskStatus::Finished
            | TaskStatus::Failed
            | TaskStatus::Killed
            | TaskStatus::Error
            | TaskStatus::Lost
            | TaskStatus::Dropped
            | TaskStatus::Gone
            | TaskStatus::GoneByOperator => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 4
    }

    /// Terminal outcomes that count against the failover budget.
    pub fn is_failure(&self) -> bool {
        self.is_terminal() && !matches!(self, TaskStatus::Finished | TaskStatus::Killed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Staging => "staging",
            TaskStatus::Starting => "starting",
            TaskStatus::Running => "running",
            TaskStatus::Killing => "killing",
            TaskStatus::Finished => "finished",
            TaskStatus::Failed => "failed",
            TaskStatus::Killed => "killed",
            TaskStatus::Error => "error",
            TaskStatus::Lost => "lost",
            TaskStatus::Dropped => "dropped",
            TaskStatus::Unreachable => "unreachable",
            TaskStatus::Gone => "gone",
            TaskStatus::GoneByOperator => "gone_by_operator",
            TaskStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TaskState> for TaskStatus {
    fn from(state: TaskState) -> Self {
        match state {
            TaskState::TaskStaging => TaskStatus::Staging,
            TaskState::TaskStarting => TaskStatus::Starting,
            TaskState::TaskRunning => TaskStatus::Running,
            TaskState::TaskKilling => TaskStatus::Killing,
            TaskState::TaskFinished => TaskStatus::Finished,
            TaskState::TaskFailed => TaskStatus::Failed,
            TaskState::TaskKilled => TaskStatus::Killed,
            TaskState::TaskError => TaskStatus::Error,
            TaskState::TaskLost => TaskStatus::Lost,
            TaskState::TaskDropped => TaskStatus::Dropped,
            TaskState::TaskUnreachable => TaskStatus::Unreachable,
            TaskState::TaskGone => TaskStatus::Gone,
            TaskState::TaskGoneByOperator => TaskStatus::GoneByOperator,
            TaskState::TaskUnknown => TaskStatus::Unknown,
        }
    }
}

/// Resources reserved for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResources {
    pub cpus: f64,
    pub mem: f64,
    pub disk: f64,
    /// Host ports, in the order of the version's port mappings.
    #[serde(default)]
    pub ports: Vec<u64>,
}

/// One launch attempt of a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub app_id: AppId,
    pub slot_index: u32,
    /// Missing on records written before versions were tracked per task.
    #[serde(default)]
    pub version_id: Option<VersionId>,
    #[serde(default)]
    pub resources: TaskResources,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent_hostname: Option<String>,
    #[serde(default)]
    pub offer_id: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        app_id: AppId,
        slot_index: u32,
        name: String,
        version_id: VersionId,
        resources: TaskResources,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            name,
            app_id,
            slot_index,
            version_id: Some(version_id),
            resources,
            agent_id: None,
            agent_hostname: None,
            offer_id: None,
            status: TaskStatus::Staging,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: TaskStatus, message: Option<String>) {
        self.status = status;
        if message.is_some() {
            self.message = message;
        }
        self.updated_at = Utc::now();
    }
}

/// Task name: `{index}.{app name}.{cluster}`.
pub fn task_name(slot_index: u32, app_name: &str, cluster_id: &str) -> String {
    format!("{slot_index}.{app_name}.{cluster_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskStatus::Staging, false)]
    #[case(TaskStatus::Running, false)]
    #[case(TaskStatus::Unreachable, false)]
    #[case(TaskStatus::Killing, false)]
    #[case(TaskStatus::Finished, true)]
    #[case(TaskStatus::Failed, true)]
    #[case(TaskStatus::Lost, true)]
    #[case(TaskStatus::GoneByOperator, true)]
    fn test_terminal_statuses(#[case] status: TaskStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }

    #[test]
    fn test_rank_is_monotonic_along_happy_path() {
        let path = [
            TaskStatus::Staging,
            TaskStatus::Starting,
            TaskStatus::Running,
            TaskStatus::Killing,
            TaskStatus::Killed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].rank() < pair[1].rank(), "{:?} !< {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failure_excludes_clean_exits() {
        assert!(TaskStatus::Failed.is_failure());
        assert!(TaskStatus::Lost.is_failure());
        assert!(!TaskStatus::Finished.is_failure());
        assert!(!TaskStatus::Killed.is_failure());
        assert!(!TaskStatus::Running.is_failure());
    }

    #[test]
    fn test_from_proto_state() {
        assert_eq!(TaskStatus::from(TaskState::TaskRunning), TaskStatus::Running);
        assert_eq!(
            TaskStatus::from(TaskState::TaskGoneByOperator),
            TaskStatus::GoneByOperator
        );
    }

    #[test]
    fn test_task_name() {
        assert_eq!(task_name(3, "web", "prod_east"), "3.web.prod_east");
    }

    #[test]
    fn test_task_record_without_version_parses() {
        let task = Task::new(
            AppId::new(),
            0,
            "0.web.c".into(),
            VersionId::new(),
            TaskResources::default(),
        );
        let mut json = serde_json::to_value(&task).unwrap();
        json.as_object_mut().unwrap().remove("version_id");
        let parsed: Task = serde_json::from_value(json).unwrap();
        assert!(parsed.version_id.is_none());
    }
}
