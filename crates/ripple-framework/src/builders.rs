//! Handler builder functions for common event shapes.
//!
//! Each function returns a [`HandlerBuilder`] bound to a family and, where it
//! makes sense, preloaded with a checker, matcher or parser.
//!
//! ```rust,ignore
//! let handlers = vec![
//!     on_full_match(["ping"]).handle(pong)?,
//!     on_command([".", "/"], [" "], ["echo"]).block(true).handle(echo)?,
//!     on_friend_request().handle(accept_friend)?,
//!     on_notice(Some(NoticeType::GroupIncrease)).handle(welcome)?,
//! ];
//! ```

use ripple_core::NoticeType;

use crate::checker::{
    AtChecker, Checker, FriendRequestChecker, GroupRequestChecker, NoticeTypeChecker,
};
use crate::error::PredicateResult;
use crate::handler::{HandlerBuilder, HandlerFamily};
use crate::logic::LogicMode;
use crate::matcher::{
    ContainMatcher, EndMatcher, FullMatcher, Match, Matcher, RegexMatcher, StartMatcher,
};
use crate::parser::CmdParser;

/// Handles every dispatchable event.
pub fn on_event() -> HandlerBuilder {
    HandlerBuilder::new(HandlerFamily::Any)
}

/// Handles message events.
pub fn on_message() -> HandlerBuilder {
    HandlerBuilder::new(HandlerFamily::Message)
}

/// Handles every message event; alias of [`on_message`].
pub fn on_every_message() -> HandlerBuilder {
    on_message()
}

/// Handles messages that mention `qq`, or mention anyone when `None`.
pub fn on_at_qq(qq: Option<i64>) -> HandlerBuilder {
    let checker = match qq {
        Some(qq) => AtChecker::target(qq),
        None => AtChecker::any(),
    };
    on_message().base_checker(Checker::new(checker))
}

fn with_matcher(matcher: PredicateResult<impl Match + 'static>) -> HandlerBuilder {
    match matcher {
        Ok(m) => on_message().matcher(Matcher::new(m)),
        Err(e) => on_message().fail(e),
    }
}

/// Handles messages starting with any of `targets`.
pub fn on_start_match<I, S>(targets: I) -> HandlerBuilder
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    with_matcher(StartMatcher::new(targets, LogicMode::Or))
}

/// Handles messages containing any of `targets`.
pub fn on_contain_match<I, S>(targets: I) -> HandlerBuilder
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    with_matcher(ContainMatcher::new(targets, LogicMode::Or))
}

/// Handles messages equal to any of `targets`.
pub fn on_full_match<I, S>(targets: I) -> HandlerBuilder
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    with_matcher(FullMatcher::new(targets, LogicMode::Or))
}

/// Handles messages ending with any of `targets`.
pub fn on_end_match<I, S>(targets: I) -> HandlerBuilder
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    with_matcher(EndMatcher::new(targets, LogicMode::Or))
}

/// Handles messages matching a regular expression.
pub fn on_regex_match(pattern: &str) -> HandlerBuilder {
    with_matcher(RegexMatcher::new(pattern))
}

/// Handles commands parsed by a [`CmdParser`].
pub fn on_command<A, B, C>(starts: A, separators: B, targets: C) -> HandlerBuilder
where
    A: IntoIterator,
    A::Item: Into<String>,
    B: IntoIterator,
    B::Item: Into<String>,
    C: IntoIterator,
    C::Item: Into<String>,
{
    match CmdParser::new(starts, separators, targets) {
        Ok(parser) => on_message().parser(parser),
        Err(e) => on_message().fail(e),
    }
}

/// Handles request events.
pub fn on_request() -> HandlerBuilder {
    HandlerBuilder::new(HandlerFamily::Request)
}

/// Handles add-friend requests.
pub fn on_friend_request() -> HandlerBuilder {
    on_request().base_checker(Checker::new(FriendRequestChecker))
}

/// Handles group join and invite requests.
pub fn on_group_request() -> HandlerBuilder {
    on_request().base_checker(Checker::new(GroupRequestChecker))
}

/// Handles notices of one type, or all notices when `None`.
pub fn on_notice(notice_type: Option<NoticeType>) -> HandlerBuilder {
    HandlerBuilder::new(HandlerFamily::Notice)
        .base_checker(Checker::new(NoticeTypeChecker::new(notice_type)))
}

/// Handles meta events.
pub fn on_meta_event() -> HandlerBuilder {
    HandlerBuilder::new(HandlerFamily::Meta)
}
