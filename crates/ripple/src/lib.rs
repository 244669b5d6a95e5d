//! # Ripple
//!
//! An event-driven automation core for chat bots.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  frames  ┌─────────┐  events  ┌────────────┐  priority order  ┌──────────────┐
//! │  transport   │─────────▶│ Runtime │─────────▶│ Dispatcher │─────────────────▶│ EventHandler │
//! │ (your code)  │◀─────────│         │          └────────────┘                  │  + sessions  │
//! └──────────────┘  actions └─────────┘◀─────────────────────────────────────────└──────────────┘
//!                                          ChannelResponder
//! ```
//!
//! - **Events** are classified JSON payloads (message, request, notice, meta,
//!   response)
//! - **Handlers** combine checkers, a matcher or parser, an optional session
//!   rule and an async body
//! - **The dispatcher** evaluates handlers from highest to lowest priority; a
//!   blocking handler that processes an event cuts off everything below it
//! - **Sessions** correlate follow-up events to a running or held invocation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ripple::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = Runtime::builder().build()?;
//!     runtime.bind([
//!         on_full_match(["ping"])
//!             .block(true)
//!             .handle(|ctx: HandlerContext| async move { ctx.reply("pong").await })?,
//!         on_command(["."], [" "], ["echo"]).handle(|ctx: HandlerContext| async move {
//!             let words = ctx.args().map(|a| a.values.join(" ")).unwrap_or_default();
//!             ctx.reply(words).await
//!         })?,
//!     ]);
//!
//!     let (inbound_tx, inbound) = tokio::sync::mpsc::channel(64);
//!     let outbound = runtime.take_outbound().expect("first call");
//!     spawn_transport(inbound_tx, outbound);
//!     runtime.run(inbound).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log lines

pub use ripple_core as core;
pub use ripple_framework as framework;
pub use ripple_runtime as runtime;

/// Commonly used types for building bots.
///
/// ```rust,ignore
/// use ripple::prelude::*;
/// ```
pub mod prelude {
    // Runtime
    pub use ripple_runtime::{RippleConfig, Runtime, RuntimeError};

    // Event model
    pub use ripple_core::{Action, Event, EventKind, NoticeType, Priority, Taggable};

    // Handler surface
    pub use ripple_framework::{
        Checker, HandlerBuilder, HandlerContext, HandlerError, KeyRule, LogicMode, Matcher,
        SendError, UserLevel, callback, on_at_qq, on_command, on_contain_match, on_end_match,
        on_event, on_every_message, on_friend_request, on_full_match, on_group_request,
        on_message, on_meta_event, on_notice, on_regex_match, on_request, on_start_match,
    };
}
