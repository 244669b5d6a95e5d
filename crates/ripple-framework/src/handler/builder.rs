use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use ripple_core::Priority;

use super::{EventHandler, Executor, HandlerFamily, SessionOptions, into_executor};
use crate::checker::{Callback, Checker};
use crate::error::{HandlerError, HandlerResult, PredicateError};
use crate::matcher::Matcher;
use crate::parser::Parser;
use crate::session::{SessionRegistry, SessionRule};

/// Configures an [`EventHandler`].
///
/// Every option is validated when [`handle`](Self::handle) is called:
///
/// - `hold`, `direct_rouse`, `conflict_wait` and `conflict_callback` need a
///   [`session`](Self::session) rule.
/// - `conflict_wait` and `conflict_callback` exclude each other.
/// - A handler takes a matcher or a parser, not both, and only message
///   handlers take either.
///
/// ```rust,ignore
/// let handler = on_command(["."], [" "], ["todo"])
///     .priority(Priority::new(600))
///     .block(true)
///     .session(KeyRule::sender())
///     .hold(true)
///     .conflict_wait(true)
///     .name("todo")
///     .handle(todo)?;
/// ```
pub struct HandlerBuilder {
    family: HandlerFamily,
    name: Option<String>,
    priority: Priority,
    block: bool,
    temp: bool,
    base_checker: Option<Checker>,
    checker: Option<Checker>,
    matcher: Option<Matcher>,
    parser: Option<Arc<dyn Parser>>,
    rule: Option<Arc<dyn SessionRule>>,
    hold: bool,
    direct_rouse: bool,
    conflict_wait: bool,
    conflict_cb: Option<Callback>,
    timeout: Option<Duration>,
    overtime_cb: Option<Callback>,
    error: Option<PredicateError>,
}

impl HandlerBuilder {
    /// Starts a builder for the family.
    pub fn new(family: HandlerFamily) -> Self {
        Self {
            family,
            name: None,
            priority: Priority::default(),
            block: false,
            temp: false,
            base_checker: None,
            checker: None,
            matcher: None,
            parser: None,
            rule: None,
            hold: false,
            direct_rouse: false,
            conflict_wait: false,
            conflict_cb: None,
            timeout: None,
            overtime_cb: None,
            error: None,
        }
    }

    /// Family checker installed by the `on_*` constructors, evaluated before
    /// the user checker.
    pub(crate) fn base_checker(mut self, checker: Checker) -> Self {
        self.base_checker = Some(checker);
        self
    }

    /// Records a predicate construction failure to report from `handle`.
    pub(crate) fn fail(mut self, error: PredicateError) -> Self {
        self.error.get_or_insert(error);
        self
    }

    /// Sets a name for logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the priority. Defaults to [`Priority::MEAN`].
    pub fn priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Whether processing an event blocks lower-priority handlers.
    pub fn block(mut self, block: bool) -> Self {
        self.block = block;
        self
    }

    /// Whether the handler deregisters after its first processed event.
    pub fn temp(mut self, temp: bool) -> Self {
        self.temp = temp;
        self
    }

    /// Sets the event checker.
    pub fn checker(mut self, checker: Checker) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Sets the text matcher.
    pub fn matcher(mut self, matcher: Matcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Sets the command parser.
    pub fn parser(mut self, parser: impl Parser + 'static) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    /// Enables sessions correlated by `rule`.
    pub fn session(mut self, rule: impl SessionRule + 'static) -> Self {
        self.rule = Some(Arc::new(rule));
        self
    }

    /// Keeps sessions alive after the invocation completes.
    pub fn hold(mut self, hold: bool) -> Self {
        self.hold = hold;
        self
    }

    /// Skips the predicates for events that continue an existing session.
    pub fn direct_rouse(mut self, direct_rouse: bool) -> Self {
        self.direct_rouse = direct_rouse;
        self
    }

    /// Queues conflicting events until the session is free.
    pub fn conflict_wait(mut self, wait: bool) -> Self {
        self.conflict_wait = wait;
        self
    }

    /// Runs `cb` when an event is dropped because its session is busy.
    pub fn conflict_callback(mut self, cb: Callback) -> Self {
        self.conflict_cb = Some(cb);
        self
    }

    /// Cancels the executor after `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Runs `cb` when the executor is cancelled by the timeout.
    pub fn overtime_callback(mut self, cb: Callback) -> Self {
        self.overtime_cb = Some(cb);
        self
    }

    fn validate(&self) -> HandlerResult<()> {
        if let Some(error) = &self.error {
            return Err(error.clone().into());
        }
        if !(Priority::MIN..=Priority::MAX).contains(&self.priority) {
            return Err(HandlerError::PriorityOutOfRange {
                level: self.priority,
            });
        }
        if self.rule.is_none() {
            let options = [
                ("hold", self.hold),
                ("direct_rouse", self.direct_rouse),
                ("conflict_wait", self.conflict_wait),
                ("conflict_callback", self.conflict_cb.is_some()),
            ];
            if let Some((option, _)) = options.into_iter().find(|(_, set)| *set) {
                return Err(HandlerError::SessionOptionWithoutRule { option });
            }
        }
        if self.conflict_wait && self.conflict_cb.is_some() {
            return Err(HandlerError::ConflictWaitWithCallback);
        }
        if self.matcher.is_some() && self.parser.is_some() {
            return Err(HandlerError::MatcherAndParser);
        }
        let text_predicate = self.matcher.is_some() || self.parser.is_some();
        if text_predicate && self.family != HandlerFamily::Message {
            return Err(HandlerError::TextPredicateOnNonMessage);
        }
        Ok(())
    }

    /// Validates the configuration and binds the executor.
    pub fn handle<F>(self, executor: F) -> HandlerResult<EventHandler>
    where
        F: Executor + 'static,
    {
        self.validate()?;

        let session = self.rule.map(|rule| SessionOptions {
            registry: SessionRegistry::new(rule, self.hold),
            direct_rouse: self.direct_rouse,
            conflict_wait: self.conflict_wait,
            conflict_cb: self.conflict_cb,
        });

        Ok(EventHandler {
            name: self.name,
            family: self.family,
            priority: self.priority,
            block: self.block,
            temp: self.temp,
            valid: AtomicBool::new(true),
            base_checker: self.base_checker,
            checker: self.checker,
            matcher: self.matcher,
            parser: self.parser,
            session,
            timeout: self.timeout,
            overtime_cb: self.overtime_cb,
            executor: into_executor(executor),
        })
    }
}

impl std::fmt::Debug for HandlerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerBuilder")
            .field("family", &self.family)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("block", &self.block)
            .field("temp", &self.temp)
            .field("session", &self.rule.is_some())
            .finish_non_exhaustive()
    }
}
