//! Outbound actions.
//!
//! An [`Action`] is one protocol operation (`send_private_msg`, `delete_msg`,
//! ...) with its parameter object. It serializes to the transport-neutral frame
//!
//! ```json
//! {"action": "<operation>", "params": {...}, "echo": "<id>"}
//! ```
//!
//! where `echo` only appears when the caller asked to await a response.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::trace;

use crate::error::{CoreError, CoreResult};
use crate::event::Event;
use crate::tag::{TagStore, Taggable};

/// An outbound protocol operation.
pub struct Action {
    operation: String,
    params: Value,
    echo: Option<String>,
    trigger: Option<Arc<Event>>,
    tags: TagStore,
}

#[derive(Serialize)]
struct Frame<'a> {
    action: &'a str,
    params: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    echo: Option<&'a str>,
}

impl Action {
    /// Creates an action that does not expect a response.
    pub fn new(operation: impl Into<String>, params: Value) -> Self {
        Self {
            operation: operation.into(),
            params,
            echo: None,
            trigger: None,
            tags: TagStore::new(),
        }
    }

    /// Requests a response, generating a fresh correlation id.
    pub fn with_response(self) -> Self {
        let echo = uuid::Uuid::new_v4().to_string();
        trace!(operation = %self.operation, %echo, "Action awaits response");
        self.with_echo(echo)
    }

    /// Requests a response under a caller-chosen correlation id.
    pub fn with_echo(mut self, echo: impl Into<String>) -> Self {
        self.echo = Some(echo.into());
        self
    }

    /// Operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Parameter payload.
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Correlation id, if a response was requested.
    pub fn echo(&self) -> Option<&str> {
        self.echo.as_deref()
    }

    /// The event this action was produced for.
    pub fn trigger(&self) -> Option<&Arc<Event>> {
        self.trigger.as_ref()
    }

    /// Records the triggering event. Can only happen once.
    pub fn fill_trigger(&mut self, event: Arc<Event>) -> CoreResult<()> {
        if self.trigger.is_some() {
            return Err(CoreError::AlreadyTriggered {
                action: self.operation.clone(),
            });
        }
        self.trigger = Some(event);
        Ok(())
    }

    /// Serializes to the wire frame.
    pub fn to_frame(&self) -> Value {
        json!(Frame {
            action: &self.operation,
            params: &self.params,
            echo: self.echo.as_deref(),
        })
    }

    /// Serializes to compact JSON text.
    pub fn flatten(&self) -> String {
        self.to_frame().to_string()
    }
}

impl Taggable for Action {
    fn tags(&self) -> &TagStore {
        &self.tags
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("operation", &self.operation)
            .field("params", &self.params)
            .field("echo", &self.echo)
            .field("triggered", &self.trigger.is_some())
            .finish()
    }
}

// ============================================================================
// Common operations
// ============================================================================

impl Action {
    /// `send_private_msg`
    pub fn send_private_msg(user_id: i64, message: impl Into<Value>) -> Self {
        Self::new(
            "send_private_msg",
            json!({ "user_id": user_id, "message": message.into() }),
        )
    }

    /// `send_group_msg`
    pub fn send_group_msg(group_id: i64, message: impl Into<Value>) -> Self {
        Self::new(
            "send_group_msg",
            json!({ "group_id": group_id, "message": message.into() }),
        )
    }

    /// Replies in the scene the event came from: the group for group messages,
    /// the user otherwise. Returns `None` if the event has no addressable
    /// origin.
    pub fn reply_to(event: &Event, message: impl Into<Value>) -> Option<Self> {
        match (event.group_id(), event.user_id()) {
            (Some(group_id), _) if event.is_message() => {
                Some(Self::send_group_msg(group_id, message))
            }
            (_, Some(user_id)) => Some(Self::send_private_msg(user_id, message)),
            (Some(group_id), None) => Some(Self::send_group_msg(group_id, message)),
            (None, None) => None,
        }
    }

    /// `delete_msg`
    pub fn delete_msg(message_id: i64) -> Self {
        Self::new("delete_msg", json!({ "message_id": message_id }))
    }

    /// `set_friend_add_request`
    pub fn set_friend_add_request(flag: impl Into<String>, approve: bool) -> Self {
        Self::new(
            "set_friend_add_request",
            json!({ "flag": flag.into(), "approve": approve }),
        )
    }

    /// `set_group_add_request`
    pub fn set_group_add_request(
        flag: impl Into<String>,
        sub_type: impl Into<String>,
        approve: bool,
        reason: Option<&str>,
    ) -> Self {
        let mut params = json!({
            "flag": flag.into(),
            "sub_type": sub_type.into(),
            "approve": approve,
        });
        if let Some(reason) = reason {
            params["reason"] = json!(reason);
        }
        Self::new("set_group_add_request", params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_event() -> Arc<Event> {
        Arc::new(
            Event::from_value(json!({
                "post_type": "message", "message_type": "group", "message_id": 1,
                "user_id": 5, "group_id": 77, "message": "hi"
            }))
            .unwrap(),
        )
    }

    #[test]
    fn test_frame_without_echo() {
        let action = Action::new(
            "send_private_msg",
            json!({"user_id": 123, "message": "hi"}),
        );

        assert_eq!(
            action.to_frame(),
            json!({"action": "send_private_msg", "params": {"user_id": 123, "message": "hi"}})
        );
        assert!(action.to_frame().get("echo").is_none());
    }

    #[test]
    fn test_frame_with_echo() {
        let action = Action::delete_msg(9).with_echo("e-1");
        assert_eq!(
            action.to_frame(),
            json!({"action": "delete_msg", "params": {"message_id": 9}, "echo": "e-1"})
        );

        let generated = Action::delete_msg(9).with_response();
        assert_eq!(generated.echo().map(str::len), Some(36));
    }

    #[test]
    fn test_fill_trigger_once() {
        let mut action = Action::send_private_msg(1, "x");
        action.fill_trigger(message_event()).unwrap();
        assert!(action.trigger().is_some());

        let err = action.fill_trigger(message_event()).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyTriggered { action } if action == "send_private_msg"));
    }

    #[test]
    fn test_reply_to_group_message() {
        let action = Action::reply_to(&message_event(), "pong").unwrap();
        assert_eq!(action.operation(), "send_group_msg");
        assert_eq!(action.params()["group_id"], 77);
    }

    #[test]
    fn test_group_request_reason() {
        let action = Action::set_group_add_request("f", "add", false, Some("no"));
        assert_eq!(action.params()["reason"], "no");
        let action = Action::set_group_add_request("f", "add", true, None);
        assert!(action.params().get("reason").is_none());
    }
}
