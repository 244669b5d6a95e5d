//! The action egress seam.

use std::sync::Arc;

use async_trait::async_trait;

use ripple_core::{Action, Event};

use crate::error::SendError;

/// Hands serialized actions to the transport.
///
/// The framework only produces [`Action`]s; what happens to them is up to the
/// implementation (see `ripple-runtime`'s channel responder).
#[async_trait]
pub trait Responder: Send + Sync {
    /// Sends an action without waiting for a reply.
    async fn send(&self, action: Action) -> Result<(), SendError>;

    /// Sends an action and waits for the response event carrying its echo.
    async fn send_and_wait(&self, action: Action) -> Result<Arc<Event>, SendError> {
        let _ = action;
        Err(SendError::Unsupported)
    }
}

/// A responder that drops every action.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardResponder;

#[async_trait]
impl Responder for DiscardResponder {
    async fn send(&self, action: Action) -> Result<(), SendError> {
        tracing::trace!(operation = action.operation(), "Discarding action");
        Ok(())
    }
}
