//! Shared fixtures for unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use ripple_core::{Action, Event};

use crate::error::SendError;
use crate::responder::{DiscardResponder, Responder};

pub(crate) fn event(raw: Value) -> Event {
    Event::from_value(raw).unwrap()
}

pub(crate) fn private_message(user_id: i64, text: &str) -> Event {
    event(json!({
        "time": 1, "self_id": 10001,
        "post_type": "message", "message_type": "private", "sub_type": "friend",
        "message_id": 1, "user_id": user_id,
        "message": [{"type": "text", "data": {"text": text}}],
        "raw_message": text,
        "sender": {"user_id": user_id, "nickname": "tester"}
    }))
}

pub(crate) fn group_message(user_id: i64, group_id: i64, text: &str) -> Event {
    event(json!({
        "time": 1, "self_id": 10001,
        "post_type": "message", "message_type": "group", "sub_type": "normal",
        "message_id": 1, "user_id": user_id, "group_id": group_id,
        "message": [{"type": "text", "data": {"text": text}}],
        "raw_message": text,
        "sender": {"user_id": user_id, "nickname": "tester"}
    }))
}

pub(crate) fn responder() -> Arc<dyn Responder> {
    Arc::new(DiscardResponder)
}

/// Keeps every frame it is asked to send.
#[derive(Default)]
pub(crate) struct RecordingResponder {
    frames: Mutex<Vec<Value>>,
}

impl RecordingResponder {
    pub(crate) fn frames(&self) -> Vec<Value> {
        self.frames.lock().clone()
    }
}

#[async_trait]
impl Responder for RecordingResponder {
    async fn send(&self, action: Action) -> Result<(), SendError> {
        assert!(action.trigger().is_some(), "actions sent by handlers carry their trigger");
        self.frames.lock().push(action.to_frame());
        Ok(())
    }
}
