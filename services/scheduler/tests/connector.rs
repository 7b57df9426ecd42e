//! Connector against a fake cluster manager.

mod common;

use std::sync::Arc;
use std::time::Duration;

use berth_proto::{
    encode_record, Call, CallType, Event, EventType, FrameworkId, OfferId, STREAM_ID_HEADER,
};
use async_trait::async_trait;
use berth_scheduler::connector::{
    new_shared_session, update_session, Connector, ConnectorConfig, ConnectorError,
    MasterDiscovery, MasterInfo, SchedulerClient, StaticMasterDiscovery,
};
use berth_scheduler::Config;
use common::FakeMaster;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Discovery whose answer the test can move to another leader.
struct MovableLeader(std::sync::Mutex<String>);

impl MovableLeader {
    fn new(leader: String) -> Self {
        Self(std::sync::Mutex::new(leader))
    }

    fn move_to(&self, leader: String) {
        *self.0.lock().unwrap() = leader;
    }
}

#[async_trait]
impl MasterDiscovery for MovableLeader {
    async fn discover(&self, _masters: &[String]) -> Result<MasterInfo, ConnectorError> {
        Ok(MasterInfo {
            leader: self.0.lock().unwrap().clone(),
            cluster: None,
        })
    }
}

fn connector_config(event_capacity: usize) -> ConnectorConfig {
    let config = Config {
        event_channel_capacity: event_capacity,
        ..Config::default()
    };
    ConnectorConfig::from_config(&config)
}

#[tokio::test]
async fn test_subscribe_and_receive_events() {
    let master = FakeMaster::start().await;
    let discovery = Arc::new(StaticMasterDiscovery::new(
        master.leader(),
        Some("prod-east.1".into()),
    ));
    let session = new_shared_session();
    let (connector, mut channels) =
        Connector::new(connector_config(16), discovery, Arc::clone(&session)).unwrap();

    let cancel = CancellationToken::new();
    let (failures_tx, _failures_rx) = mpsc::channel(4);
    connector.start(cancel.clone(), failures_tx);

    master.push(&Event::subscribed(FrameworkId::new("fw-1"), Some(15.0)));
    master.push(&Event::heartbeat());

    let first = timeout(Duration::from_secs(5), channels.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.kind, EventType::Subscribed);
    let second = timeout(Duration::from_secs(5), channels.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.kind, EventType::Heartbeat);

    let info = session.load();
    assert_eq!(info.leader.as_deref(), Some(master.leader().as_str()));
    assert_eq!(info.cluster_id, "prodeast1");
    assert_eq!(info.stream_id.as_deref(), Some("stream-1"));

    // Calls queued on the channel reach the manager with the stream's
    // framework id stamped on.
    update_session(&session, |s| s.framework_id = Some(FrameworkId::new("fw-1")));
    channels.calls.send(Call::teardown()).await.unwrap();
    let sent = master.wait_for(CallType::Teardown, 1).await;
    assert_eq!(sent[0].framework_id, Some(FrameworkId::new("fw-1")));

    let subscribe = &master.calls_of(CallType::Subscribe)[0];
    let info = &subscribe.subscribe.as_ref().unwrap().framework_info;
    assert_eq!(info.name, "berth");
    assert_eq!(info.checkpoint, Some(true));

    cancel.cancel();
}

#[tokio::test]
async fn test_event_backpressure_holds_stream() {
    let master = FakeMaster::start().await;
    let discovery = Arc::new(StaticMasterDiscovery::new(master.leader(), None));
    let (connector, mut channels) =
        Connector::new(connector_config(1), discovery, new_shared_session()).unwrap();

    let cancel = CancellationToken::new();
    let (failures_tx, _failures_rx) = mpsc::channel(4);
    connector.start(cancel.clone(), failures_tx);

    for i in 0..5 {
        master.push(&Event::rescind(OfferId::new(format!("o-{i}"))));
    }

    // Nobody reads for a while: the channel holds at most its capacity.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(channels.events.len(), 1);

    let mut seen = Vec::new();
    for _ in 0..5 {
        let event = timeout(Duration::from_secs(5), channels.events.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push(event.event.rescind.unwrap().offer_id.value);
    }
    assert_eq!(seen, vec!["o-0", "o-1", "o-2", "o-3", "o-4"]);

    cancel.cancel();
}

#[tokio::test]
async fn test_stream_end_is_reported() {
    let master = FakeMaster::start().await;
    let discovery = Arc::new(StaticMasterDiscovery::new(master.leader(), None));
    let (connector, mut channels) =
        Connector::new(connector_config(16), discovery, new_shared_session()).unwrap();

    let (failures_tx, mut failures_rx) = mpsc::channel(4);
    connector.start(CancellationToken::new(), failures_tx);

    master.push(&Event::heartbeat());
    master.close_stream();

    let event = timeout(Duration::from_secs(5), channels.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.kind, EventType::Heartbeat);

    let failure = timeout(Duration::from_secs(5), failures_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(failure, ConnectorError::StreamEnded));
}

#[tokio::test]
async fn test_malformed_frame_is_reported() {
    let master = FakeMaster::start().await;
    let discovery = Arc::new(StaticMasterDiscovery::new(master.leader(), None));
    let (connector, _channels) =
        Connector::new(connector_config(16), discovery, new_shared_session()).unwrap();

    let (failures_tx, mut failures_rx) = mpsc::channel(4);
    connector.start(CancellationToken::new(), failures_tx);

    master.push_raw(b"12x\n{}");

    let failure = timeout(Duration::from_secs(5), failures_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(failure, ConnectorError::Framing(_)));
}

#[tokio::test]
async fn test_rejected_call_fails_session() {
    let master = FakeMaster::with_call_status(400).await;
    let discovery = Arc::new(StaticMasterDiscovery::new(master.leader(), None));
    let (connector, channels) =
        Connector::new(connector_config(16), discovery, new_shared_session()).unwrap();

    let cancel = CancellationToken::new();
    let (failures_tx, mut failures_rx) = mpsc::channel(4);
    connector.start(cancel.clone(), failures_tx);

    channels.calls.send(Call::teardown()).await.unwrap();

    let failure = timeout(Duration::from_secs(5), failures_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        failure,
        ConnectorError::CallRejected { status: 400, call_type: CallType::Teardown, .. }
    ));
    cancel.cancel();
}

#[tokio::test]
async fn test_client_requires_202() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/scheduler"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let session = new_shared_session();
    let leader = server.address().to_string();
    update_session(&session, |s| s.leader = Some(leader.clone()));
    let client = SchedulerClient::new(session).unwrap();

    let err = client.send(Call::teardown()).await.unwrap_err();
    assert!(matches!(err, ConnectorError::CallRejected { status: 200, .. }));
}

#[tokio::test]
async fn test_subscribe_without_stream_id_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/scheduler"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(encode_record(br#"{"type":"HEARTBEAT"}"#).to_vec()),
        )
        .mount(&server)
        .await;

    let discovery = Arc::new(StaticMasterDiscovery::new(server.address().to_string(), None));
    let (connector, _channels) =
        Connector::new(connector_config(16), discovery, new_shared_session()).unwrap();

    let (failures_tx, mut failures_rx) = mpsc::channel(4);
    connector.start(CancellationToken::new(), failures_tx);

    let failure = timeout(Duration::from_secs(5), failures_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(failure, ConnectorError::MissingStreamId));
}

#[tokio::test]
async fn test_subscribe_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/scheduler"))
        .respond_with(ResponseTemplate::new(503).insert_header(STREAM_ID_HEADER, "ignored"))
        .mount(&server)
        .await;

    let session = new_shared_session();
    let leader = server.address().to_string();
    update_session(&session, |s| s.leader = Some(leader.clone()));
    let client = SchedulerClient::new(session).unwrap();

    let info = berth_proto::FrameworkInfo {
        user: "root".into(),
        name: "berth".into(),
        id: None,
        failover_timeout: None,
        checkpoint: None,
        role: None,
        hostname: None,
    };
    let err = client.subscribe(info).await.unwrap_err();
    assert!(matches!(err, ConnectorError::SubscribeRejected { status: 503, .. }));
}

#[tokio::test]
async fn test_reconnect_after_hung_call_sends_queued_calls() {
    // Old leader: subscribes fine, then never answers a call.
    let stuck = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/scheduler"))
        .and(body_string_contains("SUBSCRIBE"))
        .respond_with(ResponseTemplate::new(200).insert_header(STREAM_ID_HEADER, "stream-old"))
        .mount(&stuck)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/scheduler"))
        .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_secs(3600)))
        .mount(&stuck)
        .await;

    let discovery = Arc::new(MovableLeader::new(stuck.address().to_string()));
    let (connector, channels) = Connector::new(
        connector_config(16),
        Arc::clone(&discovery) as Arc<dyn MasterDiscovery>,
        new_shared_session(),
    )
    .unwrap();
    let (failures_tx, _failures_rx) = mpsc::channel(16);

    let first = CancellationToken::new();
    let first_session = connector.start(first.clone(), failures_tx.clone());
    channels.calls.send(Call::teardown()).await.unwrap();

    // Wait until the call is in flight on the old leader.
    timeout(Duration::from_secs(5), async {
        loop {
            let requests = stuck.received_requests().await.unwrap_or_default();
            if requests
                .iter()
                .any(|r| String::from_utf8_lossy(&r.body).contains("TEARDOWN"))
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    first.cancel();
    timeout(Duration::from_secs(2), first_session)
        .await
        .expect("cancelled session must end while its call hangs")
        .unwrap();

    let master = FakeMaster::start().await;
    discovery.move_to(master.leader());
    let second = CancellationToken::new();
    connector.start(second.clone(), failures_tx);

    master.wait_for(CallType::Subscribe, 1).await;
    channels.calls.send(Call::teardown()).await.unwrap();
    let sent = timeout(Duration::from_secs(5), master.wait_for(CallType::Teardown, 1))
        .await
        .expect("new session never sent the queued call");
    assert_eq!(sent.len(), 1);

    second.cancel();
}
