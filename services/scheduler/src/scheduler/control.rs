//! Scheduler construction, sessions and the run loop.

use std::sync::Arc;
use std::time::Instant;

use berth_proto::{Call, FrameworkId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{commands, reconciler, RunExit, SchedulerCommand, SchedulerError, SchedulerHandle};
use crate::config::Config;
use crate::connector::{
    update_session, ClusterEvent, Connector, ConnectorChannels, ConnectorError, SharedSession,
};
use crate::pipeline::{HandlerContext, HandlerSettings, Pipeline};
use crate::recovery::{self, RecoveryReport};
use crate::state::{HEARTBEAT_MISS_FACTOR, SchedulerState};
use crate::store::Store;

/// Bound on queued operator commands.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Owns the scheduling state and drives it from cluster events.
pub struct Scheduler {
    config: Config,
    store: Arc<dyn Store>,
    connector: Connector,
    session: SharedSession,
    events: mpsc::Receiver<ClusterEvent>,
    calls: mpsc::Sender<Call>,
    state: SchedulerState,
    pipeline: Pipeline,
    settings: HandlerSettings,

    commands_tx: mpsc::Sender<SchedulerCommand>,
    commands_rx: mpsc::Receiver<SchedulerCommand>,
    failures_tx: mpsc::Sender<ConnectorError>,
    failures_rx: mpsc::Receiver<ConnectorError>,

    stop: CancellationToken,
    current_session: Option<ActiveSession>,
}

/// The connector session the loop is currently driving.
struct ActiveSession {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Scheduler {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        connector: Connector,
        channels: ConnectorChannels,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (failures_tx, failures_rx) = mpsc::channel(8);
        let session = Arc::clone(connector.session());

        let settings = HandlerSettings {
            refuse_seconds: config.refuse_seconds,
            framework_role: config.framework_role.clone(),
        };
        let state = SchedulerState::new(config.failover_window());

        Self {
            config,
            store,
            connector,
            session,
            events: channels.events,
            calls: channels.calls,
            state,
            pipeline: Pipeline::standard(),
            settings,
            commands_tx,
            commands_rx,
            failures_tx,
            failures_rx,
            stop: CancellationToken::new(),
            current_session: None,
        }
    }

    /// Replace the standard handler table.
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            stop: self.stop.clone(),
            commands: self.commands_tx.clone(),
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Load persisted state unless recovery is disabled.
    pub fn recover(&mut self) -> Result<RecoveryReport, SchedulerError> {
        if self.config.no_recover {
            info!("Recovery disabled; starting cold");
            return Ok(RecoveryReport::default());
        }
        Ok(recovery::recover(self.store.as_ref(), &mut self.state)?)
    }

    /// Start a new connector session under a child of the stop token.
    ///
    /// The persisted framework id, if any, is placed in the session first
    /// so the subscription resumes the same framework.
    pub fn start_session(&mut self) -> Result<(), SchedulerError> {
        self.end_session();

        let framework_id = self.store.get_framework_id()?;
        update_session(&self.session, |s| {
            if let Some(id) = &framework_id {
                s.framework_id = Some(FrameworkId::new(id.clone()));
            }
            s.stream_id = None;
        });

        // Failures of an earlier session must not end this one.
        while self.failures_rx.try_recv().is_ok() {}
        self.state.heartbeat.reset();

        let cancel = self.stop.child_token();
        let task = self.connector.start(cancel.clone(), self.failures_tx.clone());
        self.current_session = Some(ActiveSession { cancel, task });
        info!(framework_id = ?framework_id, "Session started");
        Ok(())
    }

    /// Cancel the current session and abort its task, so nothing it was
    /// awaiting outlives the session.
    fn end_session(&mut self) {
        if let Some(active) = self.current_session.take() {
            active.cancel.cancel();
            if !active.task.is_finished() {
                debug!("Aborting session task");
                active.task.abort();
            }
        }
    }

    /// Recover, open one session and run it to completion.
    pub async fn start(&mut self) -> Result<RunExit, SchedulerError> {
        self.recover()?;
        self.start_session()?;
        Ok(self.run().await)
    }

    /// Run the control loop until stopped or the session fails.
    #[instrument(skip_all)]
    pub async fn run(&mut self) -> RunExit {
        let mut tick = tokio::time::interval(self.config.heartbeat_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    info!("Scheduler stopping");
                    self.end_session();
                    return RunExit::Stopped;
                }
                Some(failure) = self.failures_rx.recv() => {
                    warn!(error = %failure, "Session failed");
                    self.end_session();
                    return RunExit::SessionFailed(failure);
                }
                event = self.events.recv() => {
                    let Some(event) = event else {
                        self.end_session();
                        return RunExit::SessionFailed(ConnectorError::StreamEnded);
                    };
                    let calls = self.dispatch(&event);
                    if !self.forward(calls).await {
                        self.end_session();
                        return RunExit::Stopped;
                    }
                }
                Some(command) = self.commands_rx.recv() => {
                    let calls = self.execute(command);
                    if !self.forward(calls).await {
                        self.end_session();
                        return RunExit::Stopped;
                    }
                }
                _ = tick.tick() => {
                    if let Err(failure) = self.on_tick(Instant::now()) {
                        warn!(error = %failure, "Session failed");
                        self.end_session();
                        return RunExit::SessionFailed(failure);
                    }
                }
            }
        }
    }

    /// Run the handler chain for one event and collect its calls.
    ///
    /// A failing chain is logged; calls produced before the failure are
    /// still sent.
    pub fn dispatch(&mut self, event: &ClusterEvent) -> Vec<Call> {
        let mut ctx = HandlerContext::new(
            &mut self.state,
            self.store.as_ref(),
            &self.session,
            &self.settings,
            event,
        );
        if let Err(e) = self.pipeline.dispatch(&mut ctx) {
            warn!(
                kind = %event.kind,
                handler = ctx.trace.last().copied().unwrap_or(""),
                error = %e,
                "Handler chain failed"
            );
        }
        ctx.response.calls
    }

    fn execute(&mut self, command: SchedulerCommand) -> Vec<Call> {
        let store = self.store.as_ref();
        match command {
            SchedulerCommand::CreateApp { spec, reply_to } => {
                let _ = reply_to.send(commands::create_app(&mut self.state, store, spec));
                Vec::new()
            }
            SchedulerCommand::DeleteApp { app_id, reply_to } => {
                match commands::delete_app(&mut self.state, store, app_id) {
                    Ok(kills) => {
                        let _ = reply_to.send(Ok(()));
                        kills
                    }
                    Err(e) => {
                        let _ = reply_to.send(Err(e));
                        Vec::new()
                    }
                }
            }
            SchedulerCommand::ListApps { reply_to } => {
                let _ = reply_to.send(commands::list_apps(&self.state));
                Vec::new()
            }
        }
    }

    /// Heartbeat watchdog and housekeeping.
    fn on_tick(&mut self, now: Instant) -> Result<(), ConnectorError> {
        if self.state.heartbeat.is_overdue(now) {
            let interval = self.state.heartbeat.interval().unwrap_or_default();
            return Err(ConnectorError::HeartbeatTimeout(interval * HEARTBEAT_MISS_FACTOR));
        }
        reconciler::invalidate_apps(&mut self.state, self.store.as_ref());
        Ok(())
    }

    /// Queue calls for the connector. Blocks while the call channel is
    /// full; returns false if stopped meanwhile.
    async fn forward(&mut self, calls: Vec<Call>) -> bool {
        for call in calls {
            debug!(call_type = ?call.call_type, "Queueing call");
            tokio::select! {
                _ = self.stop.cancelled() => return false,
                sent = self.calls.send(call) => {
                    if sent.is_err() {
                        warn!("Call channel closed");
                        return false;
                    }
                }
            }
        }
        true
    }
}
