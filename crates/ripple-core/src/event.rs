//! Inbound events.
//!
//! An [`Event`] is built once from the raw payload handed over by the protocol
//! decoder and then shared (as `Arc<Event>`) with every handler that looks at
//! it. The variant is fixed at construction; the only mutable parts are the
//! write-once [`TagStore`] and the per-parser argument cache, both behind
//! interior locks so that concurrent readers never need `&mut`.
//!
//! # Classification
//!
//! ```text
//! post_type = "message" | "message_sent"  ──▶ EventKind::Message
//! post_type = "request"                   ──▶ EventKind::Request
//! post_type = "notice"                    ──▶ EventKind::Notice
//! post_type = "meta_event"                ──▶ EventKind::Meta
//! no post_type, has "retcode"             ──▶ EventKind::Response
//! anything else                           ──▶ CoreError::UnrecognizedEvent
//! ```
//!
//! Sub-discriminators (`message_type`, `request_type`, `notice_type`,
//! `meta_event_type`) are closed sets as well; an unknown value fails instead of
//! being silently widened to a parent type.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::tag::{TagStore, Taggable};

// ============================================================================
// Event Kind
// ============================================================================

/// The variant tag of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Private or group messages.
    Message,
    /// Friend and group-join requests.
    Request,
    /// Group changes, recalls, pokes and similar notices.
    Notice,
    /// Lifecycle and heartbeat meta events.
    Meta,
    /// Replies to previously sent actions.
    Response,
}

impl EventKind {
    /// Kinds that are routed to handlers. Responses are correlated elsewhere.
    pub const DISPATCHABLE: [EventKind; 4] = [
        EventKind::Message,
        EventKind::Request,
        EventKind::Notice,
        EventKind::Meta,
    ];

    /// Returns the lowercase name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Request => "request",
            Self::Notice => "notice",
            Self::Meta => "meta",
            Self::Response => "response",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "message" | "message_sent" => Ok(Self::Message),
            "request" => Ok(Self::Request),
            "notice" => Ok(Self::Notice),
            "meta" | "meta_event" => Ok(Self::Meta),
            "response" => Ok(Self::Response),
            other => Err(CoreError::unrecognized(format!("unknown post_type '{other}'"))),
        }
    }
}

// ============================================================================
// Typed Details
// ============================================================================

/// Message scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// One-to-one chat, including group temporary sessions.
    Private,
    /// Group chat.
    Group,
}

/// Sender block of a message event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sender {
    /// Sender id, if reported.
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Nickname.
    #[serde(default)]
    pub nickname: Option<String>,
    /// Group card.
    #[serde(default)]
    pub card: Option<String>,
    /// Group role (`owner`, `admin`, `member`).
    #[serde(default)]
    pub role: Option<String>,
}

/// Fields specific to message events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDetail {
    /// Message id.
    pub message_id: i64,
    /// Private or group.
    pub message_type: MessageType,
    /// Sub type (`friend`, `group`, `normal`, `anonymous`, ...).
    #[serde(default)]
    pub sub_type: Option<String>,
    /// Sender id.
    pub user_id: i64,
    /// Source group for group messages.
    #[serde(default)]
    pub group_id: Option<i64>,
    /// CQ-string form of the message.
    #[serde(default)]
    pub raw_message: String,
    /// Sender block.
    #[serde(default)]
    pub sender: Sender,
    /// Concatenated plain text of the message.
    #[serde(skip)]
    pub text: String,
    /// `qq` values of every `at` segment, in order.
    #[serde(skip)]
    pub at_targets: Vec<String>,
}

/// Request scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Add-friend request.
    Friend,
    /// Join or invite request for a group.
    Group,
}

/// Fields specific to request events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDetail {
    /// Friend or group.
    pub request_type: RequestType,
    /// `add` or `invite` for group requests.
    #[serde(default)]
    pub sub_type: Option<String>,
    /// Requester id.
    pub user_id: i64,
    /// Target group for group requests.
    #[serde(default)]
    pub group_id: Option<i64>,
    /// Verification message.
    #[serde(default)]
    pub comment: String,
    /// Opaque flag used when answering the request.
    #[serde(default)]
    pub flag: String,
}

/// Notice categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeType {
    /// File uploaded to a group.
    GroupUpload,
    /// Admin set or unset.
    GroupAdmin,
    /// Member left or was kicked.
    GroupDecrease,
    /// Member joined.
    GroupIncrease,
    /// Member muted or unmuted.
    GroupBan,
    /// New friend.
    FriendAdd,
    /// Group message recalled.
    GroupRecall,
    /// Private message recalled.
    FriendRecall,
    /// Group card changed.
    GroupCard,
    /// Offline file received.
    OfflineFile,
    /// Other client of the account changed state.
    ClientStatus,
    /// Essence message changed.
    Essence,
    /// Poke, lucky king, honor and title changes.
    Notify,
}

/// Fields specific to notice events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoticeDetail {
    /// Notice category.
    pub notice_type: NoticeType,
    /// Sub type (e.g. `poke` for notify notices).
    #[serde(default)]
    pub sub_type: Option<String>,
    /// Affected user.
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Affected group.
    #[serde(default)]
    pub group_id: Option<i64>,
    /// Operator, when different from the user.
    #[serde(default)]
    pub operator_id: Option<i64>,
    /// Target of pokes and lucky-king notices.
    #[serde(default)]
    pub target_id: Option<i64>,
}

/// Meta event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaType {
    /// Connection lifecycle.
    Lifecycle,
    /// Periodic heartbeat.
    Heartbeat,
}

/// Fields specific to meta events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaDetail {
    /// Lifecycle or heartbeat.
    pub meta_event_type: MetaType,
    /// Sub type (`enable`, `disable`, `connect`).
    #[serde(default)]
    pub sub_type: Option<String>,
}

/// Fields specific to response events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseDetail {
    /// `ok`, `async` or `failed`.
    #[serde(default)]
    pub status: String,
    /// Return code, `0` on success.
    pub retcode: i64,
    /// Correlation id echoed back from the action.
    #[serde(default)]
    pub echo: Option<Value>,
    /// Response data.
    #[serde(default)]
    pub data: Option<Value>,
}

impl ResponseDetail {
    /// Returns the correlation id as a string, if present.
    pub fn echo(&self) -> Option<String> {
        match self.echo.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Whether the action succeeded.
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// Whether the action is still being processed asynchronously.
    pub fn is_processing(&self) -> bool {
        self.retcode == 202
    }
}

/// The typed part of an event, one variant per [`EventKind`].
#[derive(Debug, Clone)]
pub enum EventDetail {
    /// Message event fields.
    Message(MessageDetail),
    /// Request event fields.
    Request(RequestDetail),
    /// Notice event fields.
    Notice(NoticeDetail),
    /// Meta event fields.
    Meta(MetaDetail),
    /// Response event fields.
    Response(ResponseDetail),
}

impl EventDetail {
    /// Returns the variant tag.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message(_) => EventKind::Message,
            Self::Request(_) => EventKind::Request,
            Self::Notice(_) => EventKind::Notice,
            Self::Meta(_) => EventKind::Meta,
            Self::Response(_) => EventKind::Response,
        }
    }
}

// ============================================================================
// Parsed Arguments
// ============================================================================

/// Arguments extracted from message text by a parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseArgs {
    /// The matched command name.
    pub command: String,
    /// Remaining tokens.
    pub values: Vec<String>,
}

// ============================================================================
// Event
// ============================================================================

/// An inbound protocol event.
pub struct Event {
    time: i64,
    self_id: Option<i64>,
    detail: EventDetail,
    raw: Value,
    args: Mutex<Option<HashMap<String, Option<ParseArgs>>>>,
    tags: TagStore,
}

impl Event {
    /// Parses a raw JSON text payload.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| CoreError::unrecognized(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Builds an event from an already decoded payload.
    pub fn from_value(raw: Value) -> CoreResult<Self> {
        if !raw.is_object() {
            return Err(CoreError::unrecognized("payload is not a JSON object"));
        }

        let kind = match raw.get("post_type") {
            Some(Value::String(post_type)) => match post_type.parse::<EventKind>()? {
                EventKind::Response => {
                    return Err(CoreError::unrecognized("'response' is not a post_type"));
                }
                kind => kind,
            },
            Some(other) => {
                return Err(CoreError::unrecognized(format!(
                    "post_type must be a string, got {other}"
                )));
            }
            None if raw.get("retcode").is_some() => EventKind::Response,
            None => {
                return Err(CoreError::unrecognized(
                    "payload has neither post_type nor retcode",
                ));
            }
        };

        let detail = match kind {
            EventKind::Message => {
                let mut detail: MessageDetail = decode(kind, &raw)?;
                let message = raw.get("message").unwrap_or(&Value::Null);
                let (text, at_targets) = match message {
                    Value::String(s) => cq::extract_from_str(s),
                    Value::Array(segments) => cq::extract_from_segments(segments),
                    _ => cq::extract_from_str(&detail.raw_message),
                };
                detail.text = text;
                detail.at_targets = at_targets;
                EventDetail::Message(detail)
            }
            EventKind::Request => EventDetail::Request(decode(kind, &raw)?),
            EventKind::Notice => EventDetail::Notice(decode(kind, &raw)?),
            EventKind::Meta => EventDetail::Meta(decode(kind, &raw)?),
            EventKind::Response => EventDetail::Response(decode(kind, &raw)?),
        };

        let time = raw
            .get("time")
            .and_then(Value::as_i64)
            .unwrap_or_else(unix_now);
        let self_id = raw.get("self_id").and_then(Value::as_i64);

        Ok(Self {
            time,
            self_id,
            detail,
            raw,
            args: Mutex::new(None),
            tags: TagStore::new(),
        })
    }

    /// Returns the variant tag.
    pub fn kind(&self) -> EventKind {
        self.detail.kind()
    }

    /// Returns whether the event is of the given variant.
    pub fn is(&self, kind: EventKind) -> bool {
        self.kind() == kind
    }

    /// Whether this is a message event.
    pub fn is_message(&self) -> bool {
        self.is(EventKind::Message)
    }

    /// Whether this is a request event.
    pub fn is_request(&self) -> bool {
        self.is(EventKind::Request)
    }

    /// Whether this is a notice event.
    pub fn is_notice(&self) -> bool {
        self.is(EventKind::Notice)
    }

    /// Whether this is a meta event.
    pub fn is_meta(&self) -> bool {
        self.is(EventKind::Meta)
    }

    /// Whether this is a response event.
    pub fn is_response(&self) -> bool {
        self.is(EventKind::Response)
    }

    /// Unix timestamp of the event; reception time for responses.
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Id of the bot account that received the event.
    pub fn self_id(&self) -> Option<i64> {
        self.self_id
    }

    /// The untouched payload the event was built from.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// The typed part of the event.
    pub fn detail(&self) -> &EventDetail {
        &self.detail
    }

    /// Message fields, for message events.
    pub fn as_message(&self) -> Option<&MessageDetail> {
        match &self.detail {
            EventDetail::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Request fields, for request events.
    pub fn as_request(&self) -> Option<&RequestDetail> {
        match &self.detail {
            EventDetail::Request(r) => Some(r),
            _ => None,
        }
    }

    /// Notice fields, for notice events.
    pub fn as_notice(&self) -> Option<&NoticeDetail> {
        match &self.detail {
            EventDetail::Notice(n) => Some(n),
            _ => None,
        }
    }

    /// Meta fields, for meta events.
    pub fn as_meta(&self) -> Option<&MetaDetail> {
        match &self.detail {
            EventDetail::Meta(m) => Some(m),
            _ => None,
        }
    }

    /// Response fields, for response events.
    pub fn as_response(&self) -> Option<&ResponseDetail> {
        match &self.detail {
            EventDetail::Response(r) => Some(r),
            _ => None,
        }
    }

    /// Plain text of a message event; empty for other kinds.
    pub fn text(&self) -> &str {
        self.as_message().map_or("", |m| m.text.as_str())
    }

    /// The user the event originates from, when there is one.
    pub fn user_id(&self) -> Option<i64> {
        match &self.detail {
            EventDetail::Message(m) => Some(m.user_id),
            EventDetail::Request(r) => Some(r.user_id),
            EventDetail::Notice(n) => n.user_id,
            _ => None,
        }
    }

    /// The group the event belongs to, when there is one.
    pub fn group_id(&self) -> Option<i64> {
        match &self.detail {
            EventDetail::Message(m) => m.group_id,
            EventDetail::Request(r) => r.group_id,
            EventDetail::Notice(n) => n.group_id,
            _ => None,
        }
    }

    /// Looks up the cached result of a parser.
    ///
    /// `None` means the parser never ran on this event; `Some(None)` means it
    /// ran and rejected the text.
    pub fn args(&self, parser_id: &str) -> Option<Option<ParseArgs>> {
        self.args
            .lock()
            .as_ref()
            .and_then(|map| map.get(parser_id))
            .cloned()
    }

    /// Caches the result of a parser under its identity.
    pub fn store_args(&self, parser_id: &str, args: Option<ParseArgs>) {
        self.args
            .lock()
            .get_or_insert_with(HashMap::new)
            .insert(parser_id.to_string(), args);
    }
}

impl Taggable for Event {
    fn tags(&self) -> &TagStore {
        &self.tags
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind())
            .field("time", &self.time)
            .field("self_id", &self.self_id)
            .finish_non_exhaustive()
    }
}

fn decode<T: DeserializeOwned>(kind: EventKind, raw: &Value) -> CoreResult<T> {
    T::deserialize(raw).map_err(|e| {
        let reason = e.to_string();
        // serde reports closed-set mismatches as "unknown variant"; those are
        // classification failures rather than broken payloads.
        if reason.contains("unknown variant") {
            CoreError::unrecognized(format!("{kind} event: {reason}"))
        } else {
            CoreError::MalformedEvent { kind, reason }
        }
    })
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

// ============================================================================
// CQ text extraction
// ============================================================================

mod cq {
    use serde_json::Value;

    /// Extracts plain text and `at` targets from a segment array.
    pub(super) fn extract_from_segments(segments: &[Value]) -> (String, Vec<String>) {
        let mut text = String::new();
        let mut ats = Vec::new();
        for seg in segments {
            let data = seg.get("data");
            match seg.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(t) = data.and_then(|d| d.get("text")).and_then(Value::as_str) {
                        text.push_str(t);
                    }
                }
                Some("at") => {
                    if let Some(qq) = data.and_then(|d| d.get("qq")) {
                        ats.push(match qq {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        });
                    }
                }
                _ => {}
            }
        }
        (text, ats)
    }

    /// Extracts plain text and `at` targets from a CQ string.
    pub(super) fn extract_from_str(s: &str) -> (String, Vec<String>) {
        let mut text = String::new();
        let mut ats = Vec::new();
        let mut rest = s;
        while let Some(start) = rest.find("[CQ:") {
            text.push_str(&unescape(&rest[..start]));
            let Some(len) = rest[start..].find(']') else {
                // Unterminated code, keep it as text.
                text.push_str(&unescape(&rest[start..]));
                return (text, ats);
            };
            let code = &rest[start + 4..start + len];
            if let Some(params) = code.strip_prefix("at,") {
                ats.extend(
                    params
                        .split(',')
                        .filter_map(|kv| kv.strip_prefix("qq="))
                        .map(unescape),
                );
            }
            rest = &rest[start + len + 1..];
        }
        text.push_str(&unescape(rest));
        (text, ats)
    }

    fn unescape(s: &str) -> String {
        s.replace("&#44;", ",")
            .replace("&#91;", "[")
            .replace("&#93;", "]")
            .replace("&amp;", "&")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn private_message(text: &str) -> Value {
        json!({
            "time": 1700000000,
            "self_id": 10001,
            "post_type": "message",
            "message_type": "private",
            "sub_type": "friend",
            "message_id": 42,
            "user_id": 123,
            "message": [{"type": "text", "data": {"text": text}}],
            "raw_message": text,
            "font": 0,
            "sender": {"user_id": 123, "nickname": "alice"}
        })
    }

    #[test]
    fn test_message_classification() {
        let event = Event::from_value(private_message("hello")).unwrap();

        assert!(event.is_message());
        assert!(!event.is_notice());
        assert_eq!(event.kind(), EventKind::Message);
        assert_eq!(event.text(), "hello");
        assert_eq!(event.user_id(), Some(123));
        assert_eq!(event.group_id(), None);
        assert_eq!(event.self_id(), Some(10001));
        assert_eq!(event.time(), 1700000000);
    }

    #[test]
    fn test_string_message_strips_cq_codes() {
        let mut raw = private_message("");
        raw["message"] = json!("[CQ:at,qq=10001] hi &#91;there&#93;[CQ:face,id=1]!");
        let event = Event::from_value(raw).unwrap();
        let detail = event.as_message().unwrap();

        assert_eq!(detail.text, " hi [there]!");
        assert_eq!(detail.at_targets, vec!["10001".to_string()]);
    }

    #[test]
    fn test_segment_at_targets() {
        let mut raw = private_message("");
        raw["message"] = json!([
            {"type": "at", "data": {"qq": "all"}},
            {"type": "at", "data": {"qq": 555}},
            {"type": "text", "data": {"text": " ping"}}
        ]);
        let event = Event::from_value(raw).unwrap();

        assert_eq!(event.text(), " ping");
        assert_eq!(
            event.as_message().unwrap().at_targets,
            vec!["all".to_string(), "555".to_string()]
        );
    }

    #[test]
    fn test_other_kinds() {
        let req = Event::from_value(json!({
            "post_type": "request", "request_type": "friend",
            "user_id": 7, "comment": "hi", "flag": "f1", "time": 1
        }))
        .unwrap();
        assert!(req.is_request());
        assert_eq!(req.as_request().unwrap().flag, "f1");

        let notice = Event::from_value(json!({
            "post_type": "notice", "notice_type": "notify", "sub_type": "poke",
            "group_id": 9, "user_id": 7, "target_id": 10001
        }))
        .unwrap();
        assert!(notice.is_notice());
        assert_eq!(notice.as_notice().unwrap().notice_type, NoticeType::Notify);

        let meta = Event::from_value(json!({
            "post_type": "meta_event", "meta_event_type": "heartbeat", "time": 1
        }))
        .unwrap();
        assert!(meta.is_meta());

        let resp = Event::from_value(json!({
            "status": "ok", "retcode": 0, "data": {"message_id": 1}, "echo": "abc"
        }))
        .unwrap();
        assert!(resp.is_response());
        assert_eq!(resp.as_response().unwrap().echo().as_deref(), Some("abc"));
    }

    #[test]
    fn test_unrecognized_payloads_fail_fast() {
        let cases = [
            json!({"post_type": "mystery"}),
            json!({"foo": 1}),
            json!({"post_type": "message", "message_type": "channel",
                   "message_id": 1, "user_id": 1}),
            json!({"post_type": "notice", "notice_type": "group_dance"}),
            json!({"post_type": "meta_event", "meta_event_type": "status"}),
            json!([1, 2, 3]),
        ];
        for raw in cases {
            let err = Event::from_value(raw.clone()).unwrap_err();
            assert!(
                matches!(err, CoreError::UnrecognizedEvent { .. }),
                "{raw} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_malformed_payload() {
        let err = Event::from_value(json!({
            "post_type": "message", "message_type": "private", "user_id": "nope",
            "message_id": 1
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            CoreError::MalformedEvent {
                kind: EventKind::Message,
                ..
            }
        ));

        assert!(Event::parse("{not json").is_err());
    }

    #[test]
    fn test_parser_args_are_isolated() {
        let event = Event::from_value(private_message(".echo a b")).unwrap();
        assert_eq!(event.args("p1"), None);

        event.store_args(
            "p1",
            Some(ParseArgs {
                command: "echo".into(),
                values: vec!["a".into(), "b".into()],
            }),
        );
        event.store_args("p2", None);

        assert_eq!(event.args("p1").unwrap().unwrap().command, "echo");
        assert_eq!(event.args("p2"), Some(None));
        assert_eq!(event.args("p3"), None);
    }

    #[test]
    fn test_event_tags() {
        let event = Event::from_value(private_message("x")).unwrap();
        event.tag("plugin", "seen", None).unwrap();

        assert!(event.check_tag("plugin", "seen", None));
        assert!(matches!(
            event.tag("plugin", "seen", None),
            Err(CoreError::DuplicateTag { .. })
        ));
        assert!(event.tag("plugin", "other", None).is_ok());
        assert!(event.tag("other", "seen", None).is_ok());
    }
}
