//! # Ripple Framework
//!
//! Event routing for Ripple bots.
//!
//! This layer provides:
//! - Composable predicates: async [`Checker`]s over events and sync [`Matcher`]s
//!   over message text, plus a command [`Parser`]
//! - [`EventHandler`]s assembled from a [`HandlerBuilder`] (see the `on_*`
//!   functions)
//! - Session correlation with conflict handling
//! - The priority [`Dispatcher`]
//!
//! Outbound actions leave through a [`Responder`], which the runtime layer
//! implements.

pub mod builders;
pub mod checker;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod logic;
pub mod matcher;
pub mod parser;
pub mod responder;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use builders::{
    on_at_qq, on_command, on_contain_match, on_end_match, on_event, on_every_message,
    on_friend_request, on_full_match, on_group_request, on_message, on_meta_event, on_notice,
    on_regex_match, on_request, on_start_match,
};
pub use checker::{
    AccessChecker, AccessList, AsyncFnChecker, AtChecker, Callback, Check, Checker, FnChecker,
    FriendRequestChecker, GroupRequestChecker, NoticeTypeChecker, UserLevel, callback,
};
pub use context::HandlerContext;
pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::{BoxError, HandlerError, HandlerResult, PredicateError, PredicateResult, SendError};
pub use handler::{
    BoxedExecutor, EventHandler, Executor, HandlerBuilder, HandlerFamily, IntoHandlerResult,
    into_executor,
};
pub use logic::LogicMode;
pub use matcher::{
    ContainMatcher, EndMatcher, FullMatcher, Match, Matcher, RegexMatcher, StartMatcher,
};
pub use parser::{CmdParser, Parser, parse_event};
pub use responder::{DiscardResponder, Responder};
pub use session::{FnRule, KeyRule, Session, SessionRegistry, SessionRule};
