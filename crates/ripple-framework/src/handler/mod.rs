//! Event handlers.
//!
//! An [`EventHandler`] binds an executor to a family of events together with
//! its priority, predicates and session options. Handlers are assembled with a
//! [`HandlerBuilder`] (usually obtained from one of the `on_*` functions) and
//! handed to the [`Dispatcher`](crate::Dispatcher).
//!
//! # Evocation
//!
//! [`EventHandler::evoke`] decides whether the handler processes an event:
//!
//! 1. Inert temp handlers and events outside the family are declined.
//! 2. Without a session rule, the predicates are evaluated and the executor
//!    runs if they pass.
//! 3. With a session rule, the event is correlated against the handler's
//!    sessions first. See [`crate::session`] for the session life cycle.

mod builder;
mod traits;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, trace, warn};

use ripple_core::{Event, EventKind, ParseArgs, Priority};

use crate::checker::{Callback, Checker};
use crate::context::HandlerContext;
use crate::error::{HandlerError, HandlerResult};
use crate::matcher::Matcher;
use crate::parser::{Parser, parse_event};
use crate::responder::Responder;
use crate::session::{Acquire, Handoff, SessionGuard, SessionRegistry};

pub use builder::HandlerBuilder;
pub use traits::{BoxedExecutor, Executor, IntoHandlerResult, into_executor};

/// The event families a handler can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerFamily {
    /// Every dispatchable event.
    Any,
    /// Message events.
    Message,
    /// Request events.
    Request,
    /// Notice events.
    Notice,
    /// Meta events.
    Meta,
}

impl HandlerFamily {
    /// The event kinds this family receives.
    pub fn kinds(self) -> &'static [EventKind] {
        match self {
            Self::Any => &EventKind::DISPATCHABLE,
            Self::Message => &[EventKind::Message],
            Self::Request => &[EventKind::Request],
            Self::Notice => &[EventKind::Notice],
            Self::Meta => &[EventKind::Meta],
        }
    }

    /// Whether the family receives `kind`.
    pub fn accepts(self, kind: EventKind) -> bool {
        self.kinds().contains(&kind)
    }
}

impl fmt::Display for HandlerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Any => "any",
            Self::Message => "message",
            Self::Request => "request",
            Self::Notice => "notice",
            Self::Meta => "meta",
        })
    }
}

/// Session settings of a handler.
pub(crate) struct SessionOptions {
    pub(crate) registry: SessionRegistry,
    pub(crate) direct_rouse: bool,
    pub(crate) conflict_wait: bool,
    pub(crate) conflict_cb: Option<Callback>,
}

/// A registered handler.
pub struct EventHandler {
    name: Option<String>,
    family: HandlerFamily,
    priority: Priority,
    block: bool,
    temp: bool,
    valid: AtomicBool,
    base_checker: Option<Checker>,
    checker: Option<Checker>,
    matcher: Option<Matcher>,
    parser: Option<Arc<dyn Parser>>,
    session: Option<SessionOptions>,
    timeout: Option<Duration>,
    overtime_cb: Option<Callback>,
    executor: BoxedExecutor,
}

impl EventHandler {
    /// The handler name, `"unnamed"` if none was set.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    /// The family the handler is bound to.
    pub fn family(&self) -> HandlerFamily {
        self.family
    }

    /// Dispatch priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Whether processing an event blocks lower priorities.
    pub fn is_blocking(&self) -> bool {
        self.block
    }

    /// Whether the handler deregisters after its first processed event.
    pub fn is_temp(&self) -> bool {
        self.temp
    }

    /// `false` once a temp handler has processed an event.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// The handler's sessions, if it has a session rule.
    pub fn sessions(&self) -> Option<&SessionRegistry> {
        self.session.as_ref().map(|s| &s.registry)
    }

    /// Claims the single run of a temp handler.
    fn claim(&self) -> bool {
        if !self.temp {
            return true;
        }
        let claimed = self
            .valid
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if claimed {
            debug!(handler = self.name(), "Temp handler consumed");
        }
        claimed
    }

    /// Evaluates the predicates. `None` means the event was rejected;
    /// otherwise carries the parser output.
    async fn verify(&self, event: &Arc<Event>) -> Option<Option<ParseArgs>> {
        for checker in [&self.base_checker, &self.checker].into_iter().flatten() {
            if !checker.check(event).await {
                trace!(handler = self.name(), "Checker rejected event");
                return None;
            }
        }
        if let Some(matcher) = &self.matcher {
            if !matcher.is_match(event.text()) {
                trace!(handler = self.name(), "Matcher rejected event");
                return None;
            }
        }
        match &self.parser {
            Some(parser) => match parse_event(parser.as_ref(), event) {
                Some(args) => Some(Some(args)),
                None => {
                    trace!(handler = self.name(), "Parser rejected event");
                    None
                }
            },
            None => Some(None),
        }
    }

    /// Parser output without rejecting, for directly roused sessions.
    fn peek_args(&self, event: &Event) -> Option<ParseArgs> {
        self.parser
            .as_ref()
            .and_then(|parser| parse_event(parser.as_ref(), event))
    }

    /// Offers an event to the handler.
    ///
    /// Returns whether the handler processed it. Executor failures and
    /// aborted sessions are returned as errors after the session (if any) has
    /// been released.
    pub async fn evoke(
        &self,
        event: &Arc<Event>,
        responder: &Arc<dyn Responder>,
    ) -> HandlerResult<bool> {
        if !self.is_valid() || !self.family.accepts(event.kind()) {
            return Ok(false);
        }

        let Some(options) = &self.session else {
            let Some(args) = self.verify(event).await else {
                return Ok(false);
            };
            if !self.claim() {
                return Ok(false);
            }
            let ctx = HandlerContext::new(Arc::clone(event), args, None, Arc::clone(responder));
            self.run(ctx, None).await?;
            return Ok(true);
        };

        self.evoke_in_session(options, event, responder).await
    }

    async fn evoke_in_session(
        &self,
        options: &SessionOptions,
        event: &Arc<Event>,
        responder: &Arc<dyn Responder>,
    ) -> HandlerResult<bool> {
        // Predicate outcome, kept across retries so it is evaluated at most once.
        let mut verified: Option<Option<ParseArgs>> = None;
        let mut create = false;

        loop {
            match options.registry.acquire(event, create) {
                Acquire::Vacant => {
                    if verified.is_none() {
                        let Some(args) = self.verify(event).await else {
                            return Ok(false);
                        };
                        verified = Some(args);
                    }
                    create = true;
                }
                Acquire::Created(guard) => {
                    let args = verified.take().flatten();
                    return self.process(guard, event, args, responder).await;
                }
                Acquire::Free(guard) => {
                    return self.rouse(options, guard, event, &mut verified, responder).await;
                }
                Acquire::Suspended(session) => {
                    if self.admit(options, event, &mut verified).await.is_none() {
                        return Ok(false);
                    }
                    if session.wake(Arc::clone(event)) {
                        trace!(handler = self.name(), session = session.id(), "Woke suspended session");
                        return Ok(true);
                    }
                }
                Acquire::Busy(session) => {
                    if !options.conflict_wait {
                        debug!(handler = self.name(), session = session.id(), "Session conflict");
                        if let Some(cb) = &options.conflict_cb {
                            cb().await;
                        }
                        return Ok(false);
                    }
                    let Some(waiter) = options.registry.enqueue(&session) else {
                        continue;
                    };
                    trace!(handler = self.name(), session = session.id(), "Waiting for session");
                    match waiter.wait().await {
                        Ok(guard) => {
                            return self.rouse(options, guard, event, &mut verified, responder).await;
                        }
                        Err(Handoff::Aborted) => return Err(HandlerError::SessionAborted),
                        Err(_) => {}
                    }
                }
            }
        }
    }

    /// Decides whether an event may join an existing session.
    async fn admit(
        &self,
        options: &SessionOptions,
        event: &Arc<Event>,
        verified: &mut Option<Option<ParseArgs>>,
    ) -> Option<Option<ParseArgs>> {
        if let Some(args) = verified {
            return Some(args.clone());
        }
        if options.direct_rouse {
            return Some(self.peek_args(event));
        }
        let args = self.verify(event).await?;
        *verified = Some(args.clone());
        Some(args)
    }

    async fn rouse(
        &self,
        options: &SessionOptions,
        guard: SessionGuard,
        event: &Arc<Event>,
        verified: &mut Option<Option<ParseArgs>>,
        responder: &Arc<dyn Responder>,
    ) -> HandlerResult<bool> {
        let Some(args) = self.admit(options, event, verified).await else {
            guard.release();
            return Ok(false);
        };
        if let Some(session) = guard.session() {
            session.push(Arc::clone(event));
        }
        self.process(guard, event, args, responder).await
    }

    async fn process(
        &self,
        guard: SessionGuard,
        event: &Arc<Event>,
        args: Option<ParseArgs>,
        responder: &Arc<dyn Responder>,
    ) -> HandlerResult<bool> {
        if !self.claim() {
            guard.release();
            return Ok(false);
        }
        let ctx = HandlerContext::new(
            Arc::clone(event),
            args,
            guard.session().cloned(),
            Arc::clone(responder),
        );
        self.run(ctx, Some(guard)).await?;
        Ok(true)
    }

    /// Runs the executor, enforcing the timeout, then releases the session.
    async fn run(&self, ctx: HandlerContext, guard: Option<SessionGuard>) -> HandlerResult<()> {
        trace!(handler = self.name(), "Running executor");
        let body = self.executor.call(ctx);
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, body).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(handler = self.name(), ?limit, "Handler timed out");
                    if let Some(cb) = &self.overtime_cb {
                        cb().await;
                    }
                    Ok(())
                }
            },
            None => body.await,
        };

        match outcome {
            Ok(()) => {
                if let Some(guard) = guard {
                    guard.release();
                }
                Ok(())
            }
            Err(e) => {
                if let Some(guard) = guard {
                    guard.abort();
                }
                Err(HandlerError::failed(e))
            }
        }
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("name", &self.name())
            .field("family", &self.family)
            .field("priority", &self.priority)
            .field("block", &self.block)
            .field("temp", &self.temp)
            .field("session", &self.sessions())
            .finish_non_exhaustive()
    }
}
