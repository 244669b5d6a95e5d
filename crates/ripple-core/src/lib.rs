//! Event and action model for Ripple.
//!
//! This crate holds the value types that flow through the framework:
//!
//! - [`Event`]: an inbound payload, classified into one of the [`EventKind`]s
//! - [`Action`]: an outbound protocol operation
//! - [`TagStore`] / [`Taggable`]: write-once marks shared by both
//! - [`Priority`]: handler ordering
//!
//! Nothing here is async; dispatch lives in `ripple-framework`.

pub mod action;
pub mod error;
pub mod event;
pub mod priority;
pub mod tag;

pub use action::Action;
pub use error::{CoreError, CoreResult};
pub use event::{
    Event, EventDetail, EventKind, MessageDetail, MessageType, MetaDetail, MetaType, NoticeDetail,
    NoticeType, ParseArgs, RequestDetail, RequestType, ResponseDetail, Sender,
};
pub use priority::Priority;
pub use tag::{TagStore, Taggable};
