//! Connection to the cluster manager.
//!
//! The connector owns one subscription at a time. Each [`Connector::start`]
//! spawns a session task that:
//!
//! 1. discovers the leading master and the cluster identity
//! 2. subscribes and records the stream id
//! 3. spawns the decode loop feeding the bounded event channel
//! 4. drains the call channel, POSTing each call to the leader
//!
//! Anything that ends a session is sent on the failure channel; the caller
//! decides whether to reconnect.

mod client;
mod discovery;
mod stream;

use std::sync::Arc;

use arc_swap::ArcSwap;
use berth_proto::{CallType, Event, EventType, FrameworkId, FrameworkInfo, ProtoError};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::Config;

pub use client::{SchedulerClient, CALL_TIMEOUT};
pub use discovery::{HttpMasterDiscovery, MasterDiscovery, MasterInfo, StaticMasterDiscovery};

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("no master reachable: {0}")]
    Discovery(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("subscribe rejected with {status}: {body}")]
    SubscribeRejected { status: u16, body: String },

    #[error("subscribe response carried no stream id")]
    MissingStreamId,

    #[error("{call_type:?} call rejected with {status}: {body}")]
    CallRejected {
        call_type: CallType,
        status: u16,
        body: String,
    },

    #[error("event stream framing error: {0}")]
    Framing(#[from] ProtoError),

    #[error("malformed event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("event stream ended")]
    StreamEnded,

    #[error("no heartbeat for {0:?}")]
    HeartbeatTimeout(std::time::Duration),

    #[error("no connected leader")]
    NotConnected,
}

// =============================================================================
// Session info
// =============================================================================

/// Identity of the current subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionInfo {
    /// Leading master, `host:port`.
    pub leader: Option<String>,
    /// Sanitized cluster name.
    pub cluster_id: String,
    pub stream_id: Option<String>,
    pub framework_id: Option<FrameworkId>,
}

/// Session info shared between the connector and the control loop.
pub type SharedSession = Arc<ArcSwap<SessionInfo>>;

pub fn new_shared_session() -> SharedSession {
    Arc::new(ArcSwap::from_pointee(SessionInfo::default()))
}

/// Apply `f` to a copy of the session and publish it.
pub fn update_session<F>(session: &SharedSession, f: F)
where
    F: Fn(&mut SessionInfo),
{
    session.rcu(|current| {
        let mut next = SessionInfo::clone(current);
        f(&mut next);
        next
    });
}

/// Name used when the cluster reports none.
pub const UNNAMED_CLUSTER: &str = "unnamed";

/// Reduce a cluster name to `[A-Za-z0-9_]`.
///
/// Task names embed the cluster id, and downstream tooling splits task
/// names on punctuation.
pub fn sanitize_cluster_id(raw: &str) -> String {
    if raw.is_empty() {
        return UNNAMED_CLUSTER.to_string();
    }

    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if cleaned.len() == raw.len() {
        return cleaned;
    }

    warn!(
        cluster = %raw,
        sanitized = %cleaned,
        "Cluster name contains unsupported characters; stripping them"
    );
    if cleaned.is_empty() {
        UNNAMED_CLUSTER.to_string()
    } else {
        cleaned
    }
}

// =============================================================================
// Events and channels
// =============================================================================

/// Event envelope handed to the control loop.
#[derive(Debug, Clone)]
pub struct ClusterEvent {
    pub kind: EventType,
    pub event: Event,
}

impl ClusterEvent {
    pub fn new(event: Event) -> Self {
        Self {
            kind: event.event_type,
            event,
        }
    }
}

/// Endpoints of the connector's channels used by the control loop.
pub struct ConnectorChannels {
    pub events: mpsc::Receiver<ClusterEvent>,
    pub calls: mpsc::Sender<berth_proto::Call>,
}

/// Connector settings.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub masters: Vec<String>,
    pub framework_user: String,
    pub framework_name: String,
    pub framework_role: String,
    pub failover_timeout_secs: f64,
    pub event_channel_capacity: usize,
    pub call_channel_capacity: usize,
    pub max_record_len: usize,
}

impl ConnectorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            masters: config.masters.clone(),
            framework_user: config.framework_user.clone(),
            framework_name: config.framework_name.clone(),
            framework_role: config.framework_role.clone(),
            failover_timeout_secs: config.failover_timeout_secs,
            event_channel_capacity: config.event_channel_capacity,
            call_channel_capacity: config.call_channel_capacity,
            max_record_len: berth_proto::DEFAULT_MAX_RECORD_LEN,
        }
    }

    fn framework_info(&self, id: Option<FrameworkId>) -> FrameworkInfo {
        FrameworkInfo {
            user: self.framework_user.clone(),
            name: self.framework_name.clone(),
            id,
            failover_timeout: Some(self.failover_timeout_secs),
            checkpoint: Some(true),
            role: Some(self.framework_role.clone()),
            hostname: None,
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Owns the subscription to the cluster manager.
pub struct Connector {
    config: ConnectorConfig,
    discovery: Arc<dyn MasterDiscovery>,
    session: SharedSession,
    client: SchedulerClient,
    events: mpsc::Sender<ClusterEvent>,
    /// Survives sessions so queued calls are sent after a reconnect.
    calls: Arc<Mutex<mpsc::Receiver<berth_proto::Call>>>,
}

impl Connector {
    pub fn new(
        config: ConnectorConfig,
        discovery: Arc<dyn MasterDiscovery>,
        session: SharedSession,
    ) -> Result<(Self, ConnectorChannels), ConnectorError> {
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let (call_tx, call_rx) = mpsc::channel(config.call_channel_capacity);

        let connector = Self {
            config,
            discovery,
            session: Arc::clone(&session),
            client: SchedulerClient::new(session)?,
            events: event_tx,
            calls: Arc::new(Mutex::new(call_rx)),
        };

        Ok((
            connector,
            ConnectorChannels {
                events: event_rx,
                calls: call_tx,
            },
        ))
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Spawn one session. It ends on cancellation or on the first failure,
    /// which is reported on `failures`.
    pub fn start(
        &self,
        cancel: CancellationToken,
        failures: mpsc::Sender<ConnectorError>,
    ) -> JoinHandle<()> {
        let session = Session {
            config: self.config.clone(),
            discovery: Arc::clone(&self.discovery),
            session: Arc::clone(&self.session),
            client: self.client.clone(),
            events: self.events.clone(),
            calls: Arc::clone(&self.calls),
        };

        tokio::spawn(async move {
            if let Err(e) = session.run(cancel.clone(), failures.clone()).await {
                if cancel.is_cancelled() {
                    info!(error = %e, "Session ended after cancellation");
                    return;
                }
                error!(error = %e, "Session failed");
                let _ = failures.send(e).await;
            }
        })
    }
}

/// State moved into one session task.
struct Session {
    config: ConnectorConfig,
    discovery: Arc<dyn MasterDiscovery>,
    session: SharedSession,
    client: SchedulerClient,
    events: mpsc::Sender<ClusterEvent>,
    calls: Arc<Mutex<mpsc::Receiver<berth_proto::Call>>>,
}

impl Session {
    #[instrument(skip_all)]
    async fn run(
        self,
        cancel: CancellationToken,
        failures: mpsc::Sender<ConnectorError>,
    ) -> Result<(), ConnectorError> {
        let master = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            master = self.discovery.discover(&self.config.masters) => master?,
        };
        let cluster_id = sanitize_cluster_id(master.cluster.as_deref().unwrap_or(""));
        info!(leader = %master.leader, cluster_id = %cluster_id, "Discovered leading master");

        let leader = master.leader.clone();
        update_session(&self.session, |s| {
            s.leader = Some(leader.clone());
            s.cluster_id = cluster_id.clone();
            s.stream_id = None;
        });

        let framework_id = self.session.load().framework_id.clone();
        let info = self.config.framework_info(framework_id);
        let (stream_id, response) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            subscribed = self.client.subscribe(info) => subscribed?,
        };
        info!(stream_id = %stream_id, "Subscribed");

        update_session(&self.session, |s| s.stream_id = Some(stream_id.clone()));

        tokio::spawn(stream::decode_loop(
            response,
            self.events.clone(),
            cancel.clone(),
            failures,
            self.config.max_record_len,
        ));

        self.send_loop(cancel).await
    }

    async fn send_loop(&self, cancel: CancellationToken) -> Result<(), ConnectorError> {
        let mut calls = self.calls.lock().await;
        loop {
            let call = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                call = calls.recv() => call,
            };
            let Some(call) = call else {
                info!("Call channel closed; ending send loop");
                return Ok(());
            };
            // The call channel outlives this session; never hold it past
            // cancellation.
            let call_type = call.call_type;
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(call_type = ?call_type, "Session cancelled mid-call; dropping it");
                    return Ok(());
                }
                sent = self.client.send(call) => sent?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", "unnamed")]
    #[case("prod", "prod")]
    #[case("prod_east_1", "prod_east_1")]
    #[case("prod-east.1", "prodeast1")]
    #[case("a$b*c+d?e{f}g(h)i[j]k|l", "abcdefghijkl")]
    #[case("---", "unnamed")]
    #[case("ünï", "n")]
    fn test_sanitize_cluster_id(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize_cluster_id(raw), expected);
    }

    #[test]
    fn test_update_session_publishes_copy() {
        let session = new_shared_session();
        let before = session.load_full();

        update_session(&session, |s| s.cluster_id = "c1".to_string());

        assert_eq!(before.cluster_id, "");
        assert_eq!(session.load().cluster_id, "c1");
    }
}
