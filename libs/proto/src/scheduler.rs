//! Scheduler calls and events.

use serde::{Deserialize, Serialize};

use crate::{AgentId, ExecutorId, FrameworkId, Offer, OfferId, TaskId, TaskInfo, TaskStatus};

/// Header carrying the subscription's stream id on every call.
pub const STREAM_ID_HEADER: &str = "Mesos-Stream-Id";

/// Path of the scheduler endpoint on the leading master.
pub const SCHEDULER_API_PATH: &str = "/api/v1/scheduler";

// =============================================================================
// Framework registration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub user: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FrameworkId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failover_timeout: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Offer filters attached to ACCEPT and DECLINE.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    pub refuse_seconds: f64,
}

impl Filters {
    pub fn refuse(seconds: f64) -> Self {
        Self {
            refuse_seconds: seconds,
        }
    }
}

// =============================================================================
// Calls
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallType {
    Subscribe,
    Teardown,
    Accept,
    Decline,
    Revive,
    Kill,
    Shutdown,
    Acknowledge,
    Reconcile,
    Message,
    Request,
    Suppress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscribe {
    pub framework_info: FrameworkInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Launch,
    Reserve,
    Unreserve,
    Create,
    Destroy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Launch {
    pub task_infos: Vec<TaskInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch: Option<Launch>,
}

impl Operation {
    pub fn launch(task_infos: Vec<TaskInfo>) -> Self {
        Self {
            operation_type: OperationType::Launch,
            launch: Some(Launch { task_infos }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accept {
    pub offer_ids: Vec<OfferId>,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decline {
    pub offer_ids: Vec<OfferId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledge {
    pub agent_id: AgentId,
    pub task_id: TaskId,
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kill {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileTask {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconcile {
    #[serde(default)]
    pub tasks: Vec<ReconcileTask>,
}

/// One request to the scheduler endpoint.
///
/// Only the sub-message matching `call_type` is set. Call kinds without a
/// typed body here are still forwarded as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework_id: Option<FrameworkId>,
    #[serde(rename = "type")]
    pub call_type: CallType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<Subscribe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<Accept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decline: Option<Decline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledge: Option<Acknowledge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill: Option<Kill>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<Reconcile>,
}

impl Call {
    fn bare(call_type: CallType) -> Self {
        Self {
            framework_id: None,
            call_type,
            subscribe: None,
            accept: None,
            decline: None,
            acknowledge: None,
            kill: None,
            reconcile: None,
        }
    }

    pub fn subscribe(framework_info: FrameworkInfo) -> Self {
        Self {
            framework_id: framework_info.id.clone(),
            subscribe: Some(Subscribe { framework_info }),
            ..Self::bare(CallType::Subscribe)
        }
    }

    pub fn accept(offer_id: OfferId, operations: Vec<Operation>, filters: Filters) -> Self {
        Self {
            accept: Some(Accept {
                offer_ids: vec![offer_id],
                operations,
                filters: Some(filters),
            }),
            ..Self::bare(CallType::Accept)
        }
    }

    pub fn decline(offer_ids: Vec<OfferId>, filters: Filters) -> Self {
        Self {
            decline: Some(Decline {
                offer_ids,
                filters: Some(filters),
            }),
            ..Self::bare(CallType::Decline)
        }
    }

    pub fn acknowledge(agent_id: AgentId, task_id: TaskId, uuid: String) -> Self {
        Self {
            acknowledge: Some(Acknowledge {
                agent_id,
                task_id,
                uuid,
            }),
            ..Self::bare(CallType::Acknowledge)
        }
    }

    pub fn kill(task_id: TaskId, agent_id: Option<AgentId>) -> Self {
        Self {
            kill: Some(Kill { task_id, agent_id }),
            ..Self::bare(CallType::Kill)
        }
    }

    pub fn reconcile(tasks: Vec<ReconcileTask>) -> Self {
        Self {
            reconcile: Some(Reconcile { tasks }),
            ..Self::bare(CallType::Reconcile)
        }
    }

    pub fn teardown() -> Self {
        Self::bare(CallType::Teardown)
    }

    /// Stamps the framework id unless the call already carries one.
    pub fn with_framework_id(mut self, framework_id: Option<&FrameworkId>) -> Self {
        if self.framework_id.is_none() {
            self.framework_id = framework_id.cloned();
        }
        self
    }
}

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Subscribed,
    Offers,
    Rescind,
    Update,
    Message,
    Failure,
    Error,
    Heartbeat,
    /// Any event kind this build does not know about.
    #[serde(other)]
    Unknown,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Subscribed => "SUBSCRIBED",
            EventType::Offers => "OFFERS",
            EventType::Rescind => "RESCIND",
            EventType::Update => "UPDATE",
            EventType::Message => "MESSAGE",
            EventType::Failure => "FAILURE",
            EventType::Error => "ERROR",
            EventType::Heartbeat => "HEARTBEAT",
            EventType::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscribed {
    pub framework_id: FrameworkId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Offers {
    #[serde(default)]
    pub offers: Vec<Offer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rescind {
    pub offer_id: OfferId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub agent_id: AgentId,
    pub executor_id: ExecutorId,
    /// Base64 encoded payload.
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<ExecutorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

/// One event from the subscription stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribed: Option<Subscribed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offers: Option<Offers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescind: Option<Rescind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Update>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEvent>,
}

impl Event {
    fn bare(event_type: EventType) -> Self {
        Self {
            event_type,
            subscribed: None,
            offers: None,
            rescind: None,
            update: None,
            message: None,
            failure: None,
            error: None,
        }
    }

    pub fn heartbeat() -> Self {
        Self::bare(EventType::Heartbeat)
    }

    pub fn subscribed(framework_id: FrameworkId, heartbeat_interval_seconds: Option<f64>) -> Self {
        Self {
            subscribed: Some(Subscribed {
                framework_id,
                heartbeat_interval_seconds,
            }),
            ..Self::bare(EventType::Subscribed)
        }
    }

    pub fn offers(offers: Vec<Offer>) -> Self {
        Self {
            offers: Some(Offers { offers }),
            ..Self::bare(EventType::Offers)
        }
    }

    pub fn rescind(offer_id: OfferId) -> Self {
        Self {
            rescind: Some(Rescind { offer_id }),
            ..Self::bare(EventType::Rescind)
        }
    }

    pub fn update(status: TaskStatus) -> Self {
        Self {
            update: Some(Update { status }),
            ..Self::bare(EventType::Update)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(ErrorEvent {
                message: message.into(),
            }),
            ..Self::bare(EventType::Error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decline_call_json_shape() {
        let call = Call::decline(vec![OfferId::new("o-1")], Filters::refuse(1.0))
            .with_framework_id(Some(&FrameworkId::new("fw")));
        let json = serde_json::to_value(&call).unwrap();

        assert_eq!(json["type"], "DECLINE");
        assert_eq!(json["framework_id"]["value"], "fw");
        assert_eq!(json["decline"]["offer_ids"][0]["value"], "o-1");
        assert_eq!(json["decline"]["filters"]["refuse_seconds"], 1.0);
        assert!(json.get("accept").is_none());
    }

    #[test]
    fn test_with_framework_id_keeps_existing() {
        let call = Call::teardown()
            .with_framework_id(Some(&FrameworkId::new("first")))
            .with_framework_id(Some(&FrameworkId::new("second")));
        assert_eq!(call.framework_id, Some(FrameworkId::new("first")));
    }

    #[test]
    fn test_subscribe_carries_framework_id() {
        let info = FrameworkInfo {
            user: "root".into(),
            name: "berth".into(),
            id: Some(FrameworkId::new("fw-9")),
            failover_timeout: Some(60.0),
            checkpoint: Some(true),
            role: Some("*".into()),
            hostname: None,
        };
        let call = Call::subscribe(info);
        assert_eq!(call.call_type, CallType::Subscribe);
        assert_eq!(call.framework_id, Some(FrameworkId::new("fw-9")));
    }

    #[test]
    fn test_unknown_event_type_parses() {
        let event: Event =
            serde_json::from_str(r#"{"type":"INVERSE_OFFERS","inverse_offers":{}}"#).unwrap();
        assert_eq!(event.event_type, EventType::Unknown);
    }

    #[test]
    fn test_subscribed_event_parses() {
        let event: Event = serde_json::from_str(
            r#"{"type":"SUBSCRIBED","subscribed":{"framework_id":{"value":"fw-1"},"heartbeat_interval_seconds":15.0}}"#,
        )
        .unwrap();
        let subscribed = event.subscribed.unwrap();
        assert_eq!(subscribed.framework_id.as_str(), "fw-1");
        assert_eq!(subscribed.heartbeat_interval_seconds, Some(15.0));
    }
}
