//! End-to-end scheduling against a fake cluster manager.

mod common;

use std::sync::Arc;

use berth_proto::{
    resource_names, AgentId, Call, CallType, Event, FrameworkId, Offer, OfferId, Resource,
    TaskId, TaskInfo, TaskState, TaskStatus,
};
use berth_scheduler::connector::{
    new_shared_session, Connector, ConnectorConfig, StaticMasterDiscovery,
};
use berth_scheduler::state::{AppSpec, AppState, SlotState};
use berth_scheduler::store::{MemoryStore, SqliteStore, Store};
use berth_scheduler::{Config, RunExit, Scheduler, SchedulerHandle};
use common::FakeMaster;
use tokio::task::JoinHandle;

fn offer(id: &str) -> Offer {
    Offer {
        id: OfferId::new(id),
        framework_id: FrameworkId::new("fw-1"),
        agent_id: AgentId::new("agent-1"),
        hostname: "node-a".to_string(),
        resources: vec![
            Resource::scalar(resource_names::CPUS, 4.0),
            Resource::scalar(resource_names::MEM, 4096.0),
        ],
        attributes: Vec::new(),
    }
}

fn status(task_id: &TaskId, state: TaskState, uuid: &str) -> TaskStatus {
    TaskStatus {
        task_id: task_id.clone(),
        state,
        message: None,
        source: None,
        reason: None,
        agent_id: Some(AgentId::new("agent-1")),
        executor_id: None,
        timestamp: None,
        uuid: Some(uuid.to_string()),
        healthy: None,
    }
}

fn launched(call: &Call) -> Vec<TaskInfo> {
    call.accept
        .as_ref()
        .map(|accept| {
            accept
                .operations
                .iter()
                .filter_map(|op| op.launch.as_ref())
                .flat_map(|launch| launch.task_infos.iter().cloned())
                .collect()
        })
        .unwrap_or_default()
}

/// Build a scheduler talking to `master`, recover, and run one session.
fn spawn_scheduler(
    master: &FakeMaster,
    store: Arc<dyn Store>,
) -> (SchedulerHandle, JoinHandle<RunExit>) {
    let config = Config::default();
    let discovery = Arc::new(StaticMasterDiscovery::new(
        master.leader(),
        Some("test-cluster".into()),
    ));
    let (connector, channels) = Connector::new(
        ConnectorConfig::from_config(&config),
        discovery,
        new_shared_session(),
    )
    .unwrap();

    let mut scheduler = Scheduler::new(config, store, connector, channels);
    let handle = scheduler.handle();
    let run = tokio::spawn(async move { scheduler.start().await.unwrap() });
    (handle, run)
}

#[tokio::test]
async fn test_launch_and_run() {
    let master = FakeMaster::start().await;
    let (handle, run) = spawn_scheduler(&master, Arc::new(MemoryStore::new()));

    let app_id = handle
        .create_app(AppSpec::new("web", 0.5, 128.0, 1).with_command("./serve"))
        .await
        .unwrap();

    master.wait_for(CallType::Subscribe, 1).await;
    master.push(&Event::subscribed(FrameworkId::new("fw-1"), None));
    master.push(&Event::offers(vec![offer("o-1")]));

    let accepts = master.wait_for(CallType::Accept, 1).await;
    let accept = accepts[0].accept.as_ref().unwrap();
    assert_eq!(accept.offer_ids, vec![OfferId::new("o-1")]);
    assert_eq!(accepts[0].framework_id, Some(FrameworkId::new("fw-1")));

    let tasks = launched(&accepts[0]);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].name, "0.web.testcluster");
    assert_eq!(tasks[0].agent_id, AgentId::new("agent-1"));

    master.push(&Event::update(status(&tasks[0].task_id, TaskState::TaskRunning, "u-1")));

    let acks = master.wait_for(CallType::Acknowledge, 1).await;
    let ack = acks[0].acknowledge.as_ref().unwrap();
    assert_eq!(ack.task_id, tasks[0].task_id);
    assert_eq!(ack.uuid, "u-1");

    let apps = handle.list_apps().await.unwrap();
    assert_eq!(apps[0].id, app_id);
    assert_eq!(apps[0].state, AppState::Normal);
    assert_eq!(apps[0].count(SlotState::Running), 1);

    handle.stop();
    assert!(matches!(run.await.unwrap(), RunExit::Stopped));
}

#[tokio::test]
async fn test_failed_task_is_relaunched() {
    let master = FakeMaster::start().await;
    let (handle, run) = spawn_scheduler(&master, Arc::new(MemoryStore::new()));

    handle
        .create_app(AppSpec::new("worker", 1.0, 256.0, 1).with_command("./work"))
        .await
        .unwrap();

    master.wait_for(CallType::Subscribe, 1).await;
    master.push(&Event::subscribed(FrameworkId::new("fw-1"), None));
    master.push(&Event::offers(vec![offer("o-1")]));

    let accepts = master.wait_for(CallType::Accept, 1).await;
    let first = launched(&accepts[0]).remove(0);

    master.push(&Event::update(status(&first.task_id, TaskState::TaskRunning, "u-1")));
    master.push(&Event::update(status(&first.task_id, TaskState::TaskFailed, "u-2")));
    master.wait_for(CallType::Acknowledge, 2).await;

    let apps = handle.list_apps().await.unwrap();
    assert_eq!(apps[0].count(SlotState::PendingOffer), 1);

    master.push(&Event::offers(vec![offer("o-2")]));
    let accepts = master.wait_for(CallType::Accept, 2).await;
    let second = launched(&accepts[1]).remove(0);

    assert_ne!(second.task_id, first.task_id);
    assert_eq!(second.name, first.name);

    handle.stop();
    assert!(matches!(run.await.unwrap(), RunExit::Stopped));
}

#[tokio::test]
async fn test_idle_offers_are_declined() {
    let master = FakeMaster::start().await;
    let (handle, run) = spawn_scheduler(&master, Arc::new(MemoryStore::new()));

    master.wait_for(CallType::Subscribe, 1).await;
    master.push(&Event::subscribed(FrameworkId::new("fw-1"), None));
    master.push(&Event::offers(vec![offer("o-1"), offer("o-2")]));

    let declines = master.wait_for(CallType::Decline, 2).await;
    let offer_ids: Vec<OfferId> = declines
        .iter()
        .flat_map(|c| c.decline.as_ref().unwrap().offer_ids.clone())
        .collect();
    assert_eq!(offer_ids, vec![OfferId::new("o-1"), OfferId::new("o-2")]);
    assert!(master.calls_of(CallType::Accept).is_empty());

    handle.stop();
    assert!(matches!(run.await.unwrap(), RunExit::Stopped));
}

#[tokio::test]
async fn test_restart_resumes_framework_and_reconciles() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("state.db");

    let task_id = {
        let master = FakeMaster::start().await;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db).unwrap());
        let (handle, run) = spawn_scheduler(&master, store);

        handle
            .create_app(AppSpec::new("web", 0.5, 128.0, 1).with_command("./serve"))
            .await
            .unwrap();

        master.wait_for(CallType::Subscribe, 1).await;
        master.push(&Event::subscribed(FrameworkId::new("fw-1"), None));
        master.push(&Event::offers(vec![offer("o-1")]));

        let accepts = master.wait_for(CallType::Accept, 1).await;
        let task = launched(&accepts[0]).remove(0);
        master.push(&Event::update(status(&task.task_id, TaskState::TaskRunning, "u-1")));
        master.wait_for(CallType::Acknowledge, 1).await;

        handle.stop();
        run.await.unwrap();
        task.task_id
    };

    let master = FakeMaster::start().await;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db).unwrap());
    let (handle, run) = spawn_scheduler(&master, store);

    let subscribes = master.wait_for(CallType::Subscribe, 1).await;
    assert_eq!(subscribes[0].framework_id, Some(FrameworkId::new("fw-1")));
    let info = &subscribes[0].subscribe.as_ref().unwrap().framework_info;
    assert_eq!(info.id, Some(FrameworkId::new("fw-1")));

    let apps = handle.list_apps().await.unwrap();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].count(SlotState::Running), 1);

    master.push(&Event::subscribed(FrameworkId::new("fw-1"), None));
    let reconciles = master.wait_for(CallType::Reconcile, 1).await;
    let tasks = &reconciles[0].reconcile.as_ref().unwrap().tasks;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_id, task_id);
    assert_eq!(tasks[0].agent_id, Some(AgentId::new("agent-1")));

    handle.stop();
    assert!(matches!(run.await.unwrap(), RunExit::Stopped));
}
