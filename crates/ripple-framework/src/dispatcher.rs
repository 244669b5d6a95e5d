//! Priority dispatch.
//!
//! The [`Dispatcher`] keeps one handler list per [`EventKind`], sorted by
//! priority (highest first) when handlers are bound. It starts *unready*;
//! [`dispatch`](Dispatcher::dispatch) waits until the first
//! [`bind`](Dispatcher::bind) marks it ready.
//!
//! # Floor
//!
//! Within one dispatch a running `floor` starts at [`Priority::MIN`]. Handlers
//! below the floor are skipped without being evoked. A blocking handler that
//! processes the event raises the floor to its own priority, so handlers of the
//! same priority still run while strictly lower ones do not:
//!
//! ```text
//!   A (10, block, processes)  ─▶ evoked, floor = 10
//!   C (10)                    ─▶ evoked
//!   B (5)                     ─▶ skipped
//! ```
//!
//! Each event is dispatched independently; handlers of one event run one at a
//! time in priority order. A handler error or panic ends that event's dispatch
//! and is logged, never propagated.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{Instrument, Level, debug, error, span, trace};

use ripple_core::{Event, EventKind, Priority};

use crate::error::HandlerError;
use crate::handler::EventHandler;
use crate::responder::Responder;

type HandlerList = Arc<Vec<Arc<EventHandler>>>;

/// What happened to one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that were evoked, in order.
    pub evaluated: Vec<String>,
    /// Handlers that processed the event, in order.
    pub processed: Vec<String>,
    /// Whether a handler failure ended the dispatch early.
    pub aborted: bool,
}

/// Routes events to handlers by priority.
pub struct Dispatcher {
    handlers: RwLock<HashMap<EventKind, HandlerList>>,
    ready: watch::Sender<bool>,
    responder: Arc<dyn Responder>,
}

impl Dispatcher {
    /// Creates an unready dispatcher whose handlers send through `responder`.
    pub fn new(responder: Arc<dyn Responder>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            handlers: RwLock::new(HashMap::new()),
            ready,
            responder,
        }
    }

    /// Registers handlers, re-sorts every list and marks the dispatcher ready.
    pub fn bind(&self, handlers: impl IntoIterator<Item = EventHandler>) {
        let mut lists = self.handlers.write();
        let mut added = 0usize;

        for handler in handlers {
            let handler = Arc::new(handler);
            for kind in handler.family().kinds() {
                let list = lists.entry(*kind).or_default();
                Arc::make_mut(list).push(Arc::clone(&handler));
            }
            added += 1;
        }
        for list in lists.values_mut() {
            // Stable: equal priorities keep registration order.
            Arc::make_mut(list).sort_by(|a, b| b.priority().cmp(&a.priority()));
        }
        drop(lists);

        debug!(added, "Handlers bound");
        self.ready.send_replace(true);
    }

    /// Stops accepting new dispatches; pending ones wait until ready again.
    pub fn unready(&self) {
        self.ready.send_replace(false);
    }

    /// Whether dispatches run immediately.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, |list| list.len())
    }

    /// Routes one event through the handlers of its kind.
    ///
    /// Never fails: handler errors are logged and recorded in the report.
    pub async fn dispatch(&self, event: Arc<Event>) -> DispatchReport {
        let span = span!(Level::DEBUG, "dispatch", event_kind = %event.kind());
        self.dispatch_inner(event).instrument(span).await
    }

    async fn dispatch_inner(&self, event: Arc<Event>) -> DispatchReport {
        let mut report = DispatchReport::default();
        if event.is_response() {
            trace!("Response events are not dispatched");
            return report;
        }

        let mut ready = self.ready.subscribe();
        if ready.wait_for(|ready| *ready).await.is_err() {
            return report;
        }

        let Some(handlers) = self.handlers.read().get(&event.kind()).cloned() else {
            trace!("No handlers for event kind");
            return report;
        };

        let outcome = AssertUnwindSafe(self.run(&event, &handlers, &mut report))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(failure)) => Some(failure),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                let handler = report.evaluated.last().cloned().unwrap_or_default();
                Some((handler, HandlerError::Panicked { message }))
            }
        };

        if let Some((handler, err)) = failure {
            report.aborted = true;
            match err.backtrace() {
                Some(trace) => error!(
                    handler = %handler,
                    error = %err,
                    raw = %event.raw(),
                    backtrace = %trace,
                    "Handler failed, dispatch of this event aborted"
                ),
                None => error!(
                    handler = %handler,
                    error = %err,
                    raw = %event.raw(),
                    "Handler failed, dispatch of this event aborted"
                ),
            }
        }
        report
    }

    async fn run(
        &self,
        event: &Arc<Event>,
        handlers: &[Arc<EventHandler>],
        report: &mut DispatchReport,
    ) -> Result<(), (String, HandlerError)> {
        let mut floor = Priority::MIN;

        for handler in handlers {
            if handler.priority() < floor {
                trace!(handler = handler.name(), priority = %handler.priority(), %floor, "Below floor, skipped");
                continue;
            }
            if !handler.is_valid() {
                continue;
            }

            report.evaluated.push(handler.name().to_string());
            let processed = handler
                .evoke(event, &self.responder)
                .await
                .map_err(|e| (handler.name().to_string(), e))?;
            if !processed {
                continue;
            }

            report.processed.push(handler.name().to_string());
            if handler.is_blocking() && handler.priority() > floor {
                floor = handler.priority();
                debug!(handler = handler.name(), %floor, "Blocking handler raised floor");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lists = self.handlers.read();
        let counts: HashMap<_, _> = lists.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("Dispatcher")
            .field("ready", &self.is_ready())
            .field("handlers", &counts)
            .finish()
    }
}
