//! Action egress over a channel.
//!
//! [`ChannelResponder`] turns actions into JSON text frames and pushes them to
//! an `mpsc` channel drained by whatever transport the application runs.
//! Actions sent with [`send_and_wait`](Responder::send_and_wait) are parked
//! under their echo until [`resolve`](ChannelResponder::resolve) sees the
//! matching response event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use ripple_core::{Action, Event};
use ripple_framework::{Responder, SendError};

/// Sends action frames to a channel and correlates their responses.
pub struct ChannelResponder {
    frames: mpsc::Sender<String>,
    pending: Mutex<HashMap<String, oneshot::Sender<Arc<Event>>>>,
    response_timeout: Duration,
}

impl ChannelResponder {
    /// Creates a responder and the receiving end of its frame channel.
    pub fn new(capacity: usize, response_timeout: Duration) -> (Self, mpsc::Receiver<String>) {
        let (frames, rx) = mpsc::channel(capacity);
        let responder = Self {
            frames,
            pending: Mutex::new(HashMap::new()),
            response_timeout,
        };
        (responder, rx)
    }

    /// Number of actions waiting for a response.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Delivers a response event to the action waiting on its echo.
    ///
    /// Returns whether a waiter took it. Responses still being processed
    /// (`retcode` 202) leave the waiter parked.
    pub fn resolve(&self, event: Arc<Event>) -> bool {
        let Some(response) = event.as_response() else {
            return false;
        };
        let Some(echo) = response.echo() else {
            trace!("Response without echo ignored");
            return false;
        };
        if response.is_processing() {
            trace!(%echo, "Action still processing");
            return false;
        }

        let Some(waiter) = self.pending.lock().remove(&echo) else {
            debug!(%echo, "No action waiting for response");
            return false;
        };
        waiter.send(event).is_ok()
    }

    async fn push(&self, action: &Action) -> Result<(), SendError> {
        trace!(operation = action.operation(), echo = ?action.echo(), "Sending action");
        self.frames
            .send(action.flatten())
            .await
            .map_err(|_| SendError::Closed)
    }
}

#[async_trait]
impl Responder for ChannelResponder {
    async fn send(&self, action: Action) -> Result<(), SendError> {
        self.push(&action).await
    }

    async fn send_and_wait(&self, action: Action) -> Result<Arc<Event>, SendError> {
        let action = match action.echo() {
            Some(_) => action,
            None => action.with_response(),
        };
        let echo = action.echo().unwrap_or_default().to_string();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(echo.clone(), tx);
        let _slot = PendingSlot {
            pending: &self.pending,
            echo: &echo,
        };

        self.push(&action).await?;

        match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(SendError::Closed),
            Err(_) => {
                warn!(operation = action.operation(), %echo, "Action response timed out");
                Err(SendError::Timeout { echo: echo.clone() })
            }
        }
    }
}

/// Removes a parked echo when its `send_and_wait` ends, including when the
/// call is cancelled.
struct PendingSlot<'a> {
    pending: &'a Mutex<HashMap<String, oneshot::Sender<Arc<Event>>>>,
    echo: &'a str,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(self.echo);
    }
}

impl std::fmt::Debug for ChannelResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelResponder")
            .field("pending", &self.pending())
            .field("response_timeout", &self.response_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn response(echo: &str, retcode: i64) -> Arc<Event> {
        Arc::new(
            Event::from_value(json!({
                "status": if retcode == 0 { "ok" } else { "async" },
                "retcode": retcode,
                "echo": echo,
                "data": {"message_id": 99}
            }))
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_send_writes_frame() {
        let (responder, mut rx) = ChannelResponder::new(4, Duration::from_secs(1));
        responder
            .send(Action::send_private_msg(7, "hi"))
            .await
            .unwrap();

        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["action"], "send_private_msg");
        assert_eq!(frame["params"]["user_id"], 7);
        assert!(frame.get("echo").is_none());
    }

    #[tokio::test]
    async fn test_send_and_wait_resolves_by_echo() {
        let (responder, mut rx) = ChannelResponder::new(4, Duration::from_secs(5));
        let responder = Arc::new(responder);

        let waiting = {
            let responder = Arc::clone(&responder);
            tokio::spawn(async move {
                responder
                    .send_and_wait(Action::delete_msg(1).with_echo("abc"))
                    .await
            })
        };

        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["echo"], "abc");
        assert_eq!(responder.pending(), 1);

        assert!(!responder.resolve(response("other", 0)));
        assert!(!responder.resolve(response("abc", 202)));
        assert!(responder.resolve(response("abc", 0)));

        let event = waiting.await.unwrap().unwrap();
        assert_eq!(event.as_response().unwrap().data, Some(json!({"message_id": 99})));
        assert_eq!(responder.pending(), 0);
    }

    #[tokio::test]
    async fn test_send_and_wait_assigns_echo() {
        let (responder, mut rx) = ChannelResponder::new(4, Duration::from_millis(20));
        let err = responder
            .send_and_wait(Action::delete_msg(1))
            .await
            .unwrap_err();

        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        let echo = frame["echo"].as_str().unwrap().to_string();
        assert!(matches!(err, SendError::Timeout { echo: e } if e == echo));
        assert_eq!(responder.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_wait_forgets_echo() {
        let (responder, mut rx) = ChannelResponder::new(4, Duration::from_secs(60));
        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            responder.send_and_wait(Action::delete_msg(1).with_echo("gone")),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(responder.pending(), 0);

        // A late response finds nobody waiting.
        assert!(rx.recv().await.is_some());
        assert!(!responder.resolve(response("gone", 0)));
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (responder, rx) = ChannelResponder::new(1, Duration::from_secs(1));
        drop(rx);
        assert!(matches!(
            responder.send(Action::delete_msg(1)).await,
            Err(SendError::Closed)
        ));
        assert!(matches!(
            responder.send_and_wait(Action::delete_msg(1)).await,
            Err(SendError::Closed)
        ));
        assert_eq!(responder.pending(), 0);
    }
}
