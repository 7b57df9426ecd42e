//! Event pipeline: event kind → ordered handler chain.
//!
//! Chains run synchronously inside the control loop. A handler sees the
//! whole [`HandlerContext`], may mutate scheduling state (persisting first),
//! and appends outbound calls to the response. The first handler error
//! stops the chain.

mod handlers;
mod offers;

use std::collections::HashMap;

use berth_proto::{Call, EventType};
use thiserror::Error;
use tracing::debug;

use crate::connector::{ClusterEvent, SharedSession};
use crate::state::{SchedulerState, StateError};
use crate::store::{Store, StoreError};

pub use handlers::{
    error_handler, failure_handler, heartbeat_handler, logger_handler, message_handler,
    rescind_handler, subscribed_handler, terminal_handler, update_handler,
};
pub use offers::offers_handler;

/// Errors raised by handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0} event without its payload")]
    MissingPayload(EventType),
}

/// Knobs handlers need from configuration.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Refuse filter attached to ACCEPT and DECLINE.
    pub refuse_seconds: f64,
    /// Role launched resources are tagged with.
    pub framework_role: String,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            refuse_seconds: 1.0,
            framework_role: "*".to_string(),
        }
    }
}

/// Calls produced while handling one event.
#[derive(Debug, Default)]
pub struct Response {
    pub calls: Vec<Call>,
}

/// Everything a handler may read or change.
pub struct HandlerContext<'a> {
    pub state: &'a mut SchedulerState,
    pub store: &'a dyn Store,
    pub session: &'a SharedSession,
    pub settings: &'a HandlerSettings,
    pub event: &'a ClusterEvent,
    pub response: Response,
    /// Names of the handlers run so far, in order.
    pub trace: Vec<&'static str>,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        state: &'a mut SchedulerState,
        store: &'a dyn Store,
        session: &'a SharedSession,
        settings: &'a HandlerSettings,
        event: &'a ClusterEvent,
    ) -> Self {
        Self {
            state,
            store,
            session,
            settings,
            event,
            response: Response::default(),
            trace: Vec::new(),
        }
    }
}

pub type HandlerFn = fn(&mut HandlerContext<'_>) -> Result<(), HandlerError>;

/// A named step in a chain.
#[derive(Clone, Copy)]
pub struct Handler {
    pub name: &'static str,
    pub run: HandlerFn,
}

impl Handler {
    pub const fn new(name: &'static str, run: HandlerFn) -> Self {
        Self { name, run }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler").field("name", &self.name).finish()
    }
}

/// Immutable table of handler chains.
#[derive(Debug, Clone)]
pub struct Pipeline {
    chains: HashMap<EventType, Vec<Handler>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// `logger → <kind> → terminal` for every known event kind.
    pub fn standard() -> Self {
        let logger = Handler::new("logger", logger_handler);
        let terminal = Handler::new("terminal", terminal_handler);
        let chain = |name, run| vec![logger, Handler::new(name, run), terminal];

        Self::builder()
            .chain(EventType::Subscribed, chain("subscribed", subscribed_handler))
            .chain(EventType::Heartbeat, chain("heartbeat", heartbeat_handler))
            .chain(EventType::Offers, chain("offers", offers_handler))
            .chain(EventType::Rescind, chain("rescind", rescind_handler))
            .chain(EventType::Update, chain("update", update_handler))
            .chain(EventType::Message, chain("message", message_handler))
            .chain(EventType::Failure, chain("failure", failure_handler))
            .chain(EventType::Error, chain("error", error_handler))
            .build()
    }

    pub fn chain(&self, kind: EventType) -> Option<&[Handler]> {
        self.chains.get(&kind).map(Vec::as_slice)
    }

    /// Run the chain for the context's event kind.
    ///
    /// Kinds without a chain are ignored.
    pub fn dispatch(&self, ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
        let Some(chain) = self.chains.get(&ctx.event.kind) else {
            debug!(kind = %ctx.event.kind, "No handler chain for event");
            return Ok(());
        };

        for handler in chain {
            ctx.trace.push(handler.name);
            (handler.run)(ctx)?;
        }
        Ok(())
    }
}

/// Assembles a [`Pipeline`].
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    chains: HashMap<EventType, Vec<Handler>>,
}

impl PipelineBuilder {
    /// Set the chain for `kind`, replacing any earlier one.
    pub fn chain(mut self, kind: EventType, handlers: Vec<Handler>) -> Self {
        self.chains.insert(kind, handlers);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            chains: self.chains,
        }
    }
}
