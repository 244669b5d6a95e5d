//! Error types for the Ripple framework.

use std::backtrace::Backtrace;

use thiserror::Error;

use ripple_core::{CoreError, Priority};

use crate::logic::LogicMode;

/// A boxed error returned by handler executors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while building predicates.
///
/// These are configuration-time failures and surface to whoever is assembling
/// the checker or matcher.
#[derive(Debug, Clone, Error)]
pub enum PredicateError {
    /// A binary mode was combined without a right operand.
    #[error("'{mode}' combination requires a right operand")]
    MissingOperand {
        /// The binary mode.
        mode: LogicMode,
    },

    /// `not` was given a second operand.
    #[error("'not' takes exactly one operand")]
    UnexpectedOperand,

    /// A callback slot was filled twice.
    #[error("{slot} callback is already set")]
    CallbackAlreadySet {
        /// `"ok"` or `"fail"`.
        slot: &'static str,
    },

    /// A text matcher or parser was built with nothing to match.
    #[error("at least one target is required")]
    EmptyTargets,

    /// A regular expression failed to compile.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// The mode cannot fold a sequence of values.
    #[error("'{mode}' cannot combine a sequence of values")]
    UnsupportedSequenceMode {
        /// The rejected mode.
        mode: LogicMode,
    },
}

/// Result type for predicate construction.
pub type PredicateResult<T> = Result<T, PredicateError>;

/// Errors raised by the action egress path.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    /// The responder no longer accepts actions.
    #[error("responder is closed")]
    Closed,

    /// The action could not be prepared.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// No response arrived in time.
    #[error("timed out waiting for response '{echo}'")]
    Timeout {
        /// Correlation id of the action.
        echo: String,
    },

    /// The responder cannot correlate responses.
    #[error("responder does not support awaiting responses")]
    Unsupported,
}

/// Errors raised while registering or running handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A session option was set on a handler without a session rule.
    #[error("'{option}' requires a session rule")]
    SessionOptionWithoutRule {
        /// The option name.
        option: &'static str,
    },

    /// Both conflict policies were configured.
    #[error("conflict_wait and conflict_callback are mutually exclusive")]
    ConflictWaitWithCallback,

    /// Both a matcher and a parser were configured.
    #[error("a handler takes either a matcher or a parser, not both")]
    MatcherAndParser,

    /// A matcher or parser was given to a handler that does not see messages.
    #[error("text predicates are only valid on message handlers")]
    TextPredicateOnNonMessage,

    /// The priority lies outside `Priority::MIN..=Priority::MAX`.
    #[error("priority {level} is out of range")]
    PriorityOutOfRange {
        /// The rejected level.
        level: Priority,
    },

    /// A predicate failed to build.
    #[error(transparent)]
    Predicate(#[from] PredicateError),

    /// The executor returned an error.
    #[error("handler failed: {source}")]
    Failed {
        /// The executor's error.
        #[source]
        source: BoxError,
        /// Stack of the handler invocation that received the error.
        trace: Box<Backtrace>,
    },

    /// The executor panicked.
    #[error("handler panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The session this event was queued on was torn down by a crash.
    #[error("session aborted because its owner crashed")]
    SessionAborted,
}

impl HandlerError {
    /// Wraps an executor error, capturing the current stack.
    pub(crate) fn failed(source: BoxError) -> Self {
        Self::Failed {
            source,
            trace: Box::new(Backtrace::force_capture()),
        }
    }

    /// The stack captured where an executor error was received, if any.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            Self::Failed { trace, .. } => Some(trace.as_ref()),
            _ => None,
        }
    }
}

/// Result type for handler operations.
pub type HandlerResult<T> = Result<T, HandlerError>;
