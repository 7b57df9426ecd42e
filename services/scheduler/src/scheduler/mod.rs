//! The scheduler control loop.
//!
//! [`Scheduler`] owns all mutable scheduling state. It multiplexes inbound
//! cluster events, session failures, a periodic tick and operator commands
//! on one task; handlers therefore run to completion without locks.
//!
//! Reconnection is not handled here: [`Scheduler::run`] returns
//! [`RunExit::SessionFailed`] and the caller decides when to call
//! [`Scheduler::start_session`] again.

mod commands;
mod control;
mod reconciler;

use berth_id::AppId;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::connector::ConnectorError;
use crate::recovery::RecoveryError;
use crate::state::{AppSpec, AppSummary, StateError};
use crate::store::StoreError;

pub use control::Scheduler;
pub use reconciler::invalidate_apps;

/// Errors surfaced by the scheduler and its handle.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("scheduler is not running")]
    Stopped,
}

/// Why [`Scheduler::run`] returned.
#[derive(Debug)]
pub enum RunExit {
    /// Stop was requested.
    Stopped,
    /// The session ended; the scheduler may be restarted with a new one.
    SessionFailed(ConnectorError),
}

/// Operator requests served by the control loop.
#[derive(Debug)]
pub enum SchedulerCommand {
    CreateApp {
        spec: AppSpec,
        reply_to: oneshot::Sender<Result<AppId, SchedulerError>>,
    },
    DeleteApp {
        app_id: AppId,
        reply_to: oneshot::Sender<Result<(), SchedulerError>>,
    },
    ListApps {
        reply_to: oneshot::Sender<Vec<AppSummary>>,
    },
}

/// Cloneable access to a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    stop: CancellationToken,
    commands: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Ask the control loop to stop. The current session is cancelled.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves once stop has been requested.
    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }

    pub async fn create_app(&self, spec: AppSpec) -> Result<AppId, SchedulerError> {
        let (reply_to, reply) = oneshot::channel();
        self.send(SchedulerCommand::CreateApp { spec, reply_to })
            .await?;
        reply.await.map_err(|_| SchedulerError::Stopped)?
    }

    pub async fn delete_app(&self, app_id: AppId) -> Result<(), SchedulerError> {
        let (reply_to, reply) = oneshot::channel();
        self.send(SchedulerCommand::DeleteApp { app_id, reply_to })
            .await?;
        reply.await.map_err(|_| SchedulerError::Stopped)?
    }

    pub async fn list_apps(&self) -> Result<Vec<AppSummary>, SchedulerError> {
        let (reply_to, reply) = oneshot::channel();
        self.send(SchedulerCommand::ListApps { reply_to }).await?;
        reply.await.map_err(|_| SchedulerError::Stopped)
    }

    async fn send(&self, command: SchedulerCommand) -> Result<(), SchedulerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SchedulerError::Stopped)
    }
}
