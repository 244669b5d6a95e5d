//! The context handed to handler executors.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use ripple_core::{Action, Event, ParseArgs};

use crate::error::SendError;
use crate::responder::Responder;
use crate::session::Session;

/// Everything an executor can reach while handling one event.
///
/// The context is cheap to clone; clones share the same session and responder.
#[derive(Clone)]
pub struct HandlerContext {
    event: Arc<Event>,
    args: Option<ParseArgs>,
    session: Option<Arc<Session>>,
    responder: Arc<dyn Responder>,
}

impl HandlerContext {
    pub(crate) fn new(
        event: Arc<Event>,
        args: Option<ParseArgs>,
        session: Option<Arc<Session>>,
        responder: Arc<dyn Responder>,
    ) -> Self {
        Self {
            event,
            args,
            session,
            responder,
        }
    }

    /// The event that started this invocation.
    pub fn event(&self) -> &Arc<Event> {
        &self.event
    }

    /// Arguments produced by the handler's parser, if it has one.
    pub fn args(&self) -> Option<&ParseArgs> {
        self.args.as_ref()
    }

    /// The session this invocation holds, for handlers with a session rule.
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// The most recent event of the session, or the triggering event.
    pub fn latest_event(&self) -> Arc<Event> {
        self.session
            .as_ref()
            .and_then(|s| s.event())
            .unwrap_or_else(|| Arc::clone(&self.event))
    }

    /// Sends an action produced for this event.
    pub async fn send(&self, mut action: Action) -> Result<(), SendError> {
        action.fill_trigger(Arc::clone(&self.event))?;
        self.responder.send(action).await
    }

    /// Sends an action and waits for its response event.
    pub async fn send_and_wait(&self, action: Action) -> Result<Arc<Event>, SendError> {
        let mut action = if action.echo().is_some() {
            action
        } else {
            action.with_response()
        };
        action.fill_trigger(Arc::clone(&self.event))?;
        self.responder.send_and_wait(action).await
    }

    /// Replies in the scene of the latest event.
    ///
    /// Does nothing for events without an addressable origin.
    pub async fn reply(&self, message: impl Into<Value>) -> Result<(), SendError> {
        match Action::reply_to(&self.latest_event(), message) {
            Some(action) => self.send(action).await,
            None => Ok(()),
        }
    }

    /// Waits for the next event of this session.
    ///
    /// Returns `None` on timeout or when the handler has no session.
    pub async fn suspend(&self, timeout: Option<Duration>) -> Option<Arc<Event>> {
        match &self.session {
            Some(session) => session.suspend(timeout).await,
            None => {
                tracing::warn!("suspend called on a handler without a session rule");
                None
            }
        }
    }

    /// Expires the session, if there is one.
    pub fn expire(&self) {
        if let Some(session) = &self.session {
            session.expire();
        }
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("event", &self.event)
            .field("args", &self.args)
            .field("session", &self.session.as_ref().map(|s| s.id()))
            .finish_non_exhaustive()
    }
}
