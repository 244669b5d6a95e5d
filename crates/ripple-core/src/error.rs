//! Error types for the Ripple event and action model.

use thiserror::Error;

use crate::event::EventKind;

/// Errors raised while building or mutating events and actions.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// A `(namespace, name)` tag pair was set twice on the same object.
    #[error("duplicate tag: '{name}' is already set in namespace '{namespace}'")]
    DuplicateTag {
        /// Namespace of the tag.
        namespace: String,
        /// Name of the tag.
        name: String,
    },

    /// The trigger event of an action was filled twice.
    #[error("action '{action}' already has a trigger event recorded")]
    AlreadyTriggered {
        /// Operation name of the action.
        action: String,
    },

    /// The payload does not correspond to any known event variant.
    #[error("unrecognized event payload: {reason}")]
    UnrecognizedEvent {
        /// Why classification failed.
        reason: String,
    },

    /// The payload was classified but its fields could not be parsed.
    #[error("malformed {kind} event: {reason}")]
    MalformedEvent {
        /// The variant the payload was classified as.
        kind: EventKind,
        /// Parser error message.
        reason: String,
    },
}

impl CoreError {
    /// Creates an unrecognized-event error.
    pub fn unrecognized(reason: impl Into<String>) -> Self {
        Self::UnrecognizedEvent {
            reason: reason.into(),
        }
    }

    /// Creates a duplicate-tag error.
    pub fn duplicate_tag(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DuplicateTag {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Result type for model operations.
pub type CoreResult<T> = Result<T, CoreError>;
