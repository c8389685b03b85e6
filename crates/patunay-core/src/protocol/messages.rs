//! JSON message types for the bridge ↔ UI shell boundary.
//!
//! The bridge and the UI shell run in different processes.  Everything that
//! crosses the boundary is a JSON object whose `"channel"` field names the
//! channel it travels on.
//!
//! # Message flow
//!
//! ```text
//! UI shell → Bridge:  {"channel":"set-mode","mode":"write","data":"hello","request_id":7}
//! Bridge → UI shell:  {"channel":"write-result","payload":{"success":true,...}}
//! Bridge → UI shell:  {"channel":"reply","request_id":7,"success":true,"data":null,"error":null}
//! ```
//!
//! Inbound commands carry their fields inline next to `"channel"`.  Outbound
//! events wrap the entity in `"payload"` so that every event channel has the
//! same two-field envelope regardless of the entity it carries.
//!
//! # Why one channel per event category?
//!
//! The UI shell subscribes to exactly the categories a screen cares about (a
//! registration wizard listens for `write-result`, a dashboard for
//! `device-status`).  Keeping categories separate means a subscriber never
//! has to know how the bridge sequences its internal calls.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::outcome::{ErrorReport, SearchResult, WriteResult};
use crate::domain::status::DeviceStatus;

// ── Outbound event channels ───────────────────────────────────────────────────

/// Every outbound event category.  One channel per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventChannel {
    CardDetected,
    CardRemoved,
    WriteResult,
    CardSearchResult,
    OperationError,
    ReaderConnected,
    ReaderDisconnected,
    ServiceError,
    DeviceStatus,
}

impl EventChannel {
    /// All channels, in a stable order.
    pub const ALL: [EventChannel; 9] = [
        EventChannel::CardDetected,
        EventChannel::CardRemoved,
        EventChannel::WriteResult,
        EventChannel::CardSearchResult,
        EventChannel::OperationError,
        EventChannel::ReaderConnected,
        EventChannel::ReaderDisconnected,
        EventChannel::ServiceError,
        EventChannel::DeviceStatus,
    ];

    /// The channel name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            EventChannel::CardDetected => "card-detected",
            EventChannel::CardRemoved => "card-removed",
            EventChannel::WriteResult => "write-result",
            EventChannel::CardSearchResult => "card-search-result",
            EventChannel::OperationError => "operation-error",
            EventChannel::ReaderConnected => "reader-connected",
            EventChannel::ReaderDisconnected => "reader-disconnected",
            EventChannel::ServiceError => "service-error",
            EventChannel::DeviceStatus => "device-status",
        }
    }
}

impl fmt::Display for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Event payloads ────────────────────────────────────────────────────────────

/// Payload of `card-detected` and `card-removed`.
///
/// In Read mode `card-detected` is emitted once the tag has been read and
/// `data` holds the decoded text.  In every other case `data` is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardEvent {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl CardEvent {
    pub fn presence(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            data: None,
        }
    }

    pub fn with_data(uid: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            data: Some(data.into()),
        }
    }
}

/// Payload of `reader-connected` and `reader-disconnected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderInfo {
    pub name: String,
}

/// An outbound event, tagged with the channel it is delivered on.
///
/// # Serde representation
///
/// ```json
/// {"channel":"card-detected","payload":{"uid":"04A1"}}
/// {"channel":"device-status","payload":{"available":false,"readers":[],"initialized":true}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "kebab-case")]
pub enum NfcEvent {
    CardDetected(CardEvent),
    CardRemoved(CardEvent),
    WriteResult(WriteResult),
    CardSearchResult(SearchResult),
    OperationError(ErrorReport),
    ReaderConnected(ReaderInfo),
    ReaderDisconnected(ReaderInfo),
    ServiceError(ErrorReport),
    DeviceStatus(DeviceStatus),
}

impl NfcEvent {
    /// The channel this event is delivered on.
    pub fn channel(&self) -> EventChannel {
        match self {
            NfcEvent::CardDetected(_) => EventChannel::CardDetected,
            NfcEvent::CardRemoved(_) => EventChannel::CardRemoved,
            NfcEvent::WriteResult(_) => EventChannel::WriteResult,
            NfcEvent::CardSearchResult(_) => EventChannel::CardSearchResult,
            NfcEvent::OperationError(_) => EventChannel::OperationError,
            NfcEvent::ReaderConnected(_) => EventChannel::ReaderConnected,
            NfcEvent::ReaderDisconnected(_) => EventChannel::ReaderDisconnected,
            NfcEvent::ServiceError(_) => EventChannel::ServiceError,
            NfcEvent::DeviceStatus(_) => EventChannel::DeviceStatus,
        }
    }
}

// ── Inbound commands ──────────────────────────────────────────────────────────

/// Commands the UI shell can send to the bridge.
///
/// `mode` stays a string here so that an unknown mode name surfaces as a
/// validation error in the reply rather than as an unparseable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "kebab-case")]
pub enum InboundCommand {
    /// Change the operating mode.  `data` is required for `write`.
    SetMode {
        mode: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },
    /// Arm a single write of `data` for the next tag tap.
    WriteTag { data: String },
    /// Request/response: reply with the current device status.
    GetDeviceStatus,
    /// Re-enumerate readers and emit a fresh `device-status` event.
    RefreshDeviceStatus,
    /// Start forwarding the named event channels to this session.
    Subscribe { channels: Vec<EventChannel> },
    /// Stop forwarding the named event channels to this session.
    Unsubscribe { channels: Vec<EventChannel> },
}

/// An inbound command plus the optional id used to correlate its reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(flatten)]
    pub command: InboundCommand,
}

impl InboundMessage {
    pub fn new(command: InboundCommand) -> Self {
        Self {
            request_id: None,
            command,
        }
    }

    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

// ── Replies ───────────────────────────────────────────────────────────────────

/// Marker serialized as `"channel": "reply"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReplyChannel {
    #[default]
    #[serde(rename = "reply")]
    Reply,
}

/// Reply to an inbound command.
///
/// Every reply has the same shape, so the UI shell can check `success`
/// without knowing which command it answers:
/// `{ "channel": "reply", "request_id": 7, "success": bool, "data": ..., "error": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub channel: ReplyChannel,
    #[serde(default)]
    pub request_id: Option<u64>,
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok(request_id: Option<u64>, data: Option<serde_json::Value>) -> Self {
        Self {
            channel: ReplyChannel::Reply,
            request_id,
            success: true,
            data,
            error: None,
        }
    }

    pub fn err(request_id: Option<u64>, msg: impl Into<String>) -> Self {
        Self {
            channel: ReplyChannel::Reply,
            request_id,
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Anything the bridge writes to the UI shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Event(NfcEvent),
    Reply(CommandResult),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_channel_names_match_serde_names() {
        for channel in EventChannel::ALL {
            let serialized = serde_json::to_value(channel).unwrap();
            assert_eq!(serialized, json!(channel.as_str()));
        }
    }

    #[test]
    fn test_card_detected_event_json_shape() {
        let event = NfcEvent::CardDetected(CardEvent::presence("04A1"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, json!({"channel": "card-detected", "payload": {"uid": "04A1"}}));
    }

    #[test]
    fn test_write_result_event_json_shape() {
        let event = NfcEvent::WriteResult(WriteResult::succeeded("04A1", "hello"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["channel"], "write-result");
        assert_eq!(json["payload"]["success"], true);
        assert_eq!(json["payload"]["data"], "hello");
    }

    #[test]
    fn test_event_channel_matches_serialized_tag() {
        let events = [
            NfcEvent::CardRemoved(CardEvent::presence("01")),
            NfcEvent::CardSearchResult(SearchResult::now("01", "x")),
            NfcEvent::OperationError(ErrorReport::new(ErrorKind::Hardware, "gone")),
            NfcEvent::ReaderConnected(ReaderInfo { name: "r".into() }),
            NfcEvent::ReaderDisconnected(ReaderInfo { name: "r".into() }),
            NfcEvent::ServiceError(ErrorReport::new(ErrorKind::Service, "boom")),
            NfcEvent::DeviceStatus(DeviceStatus::default()),
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["channel"], event.channel().as_str());
        }
    }

    #[test]
    fn test_parse_set_mode_with_request_id() {
        // Arrange
        let line = r#"{"channel":"set-mode","mode":"write","data":"hello","request_id":7}"#;

        // Act
        let msg: InboundMessage = serde_json::from_str(line).unwrap();

        // Assert
        assert_eq!(msg.request_id, Some(7));
        assert_eq!(
            msg.command,
            InboundCommand::SetMode {
                mode: "write".to_string(),
                data: Some("hello".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_set_mode_without_data() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"channel":"set-mode","mode":"search"}"#).unwrap();
        assert_eq!(msg.request_id, None);
        assert!(matches!(msg.command, InboundCommand::SetMode { data: None, .. }));
    }

    #[test]
    fn test_parse_unit_commands() {
        let get: InboundMessage =
            serde_json::from_str(r#"{"channel":"get-device-status","request_id":1}"#).unwrap();
        assert_eq!(get.command, InboundCommand::GetDeviceStatus);

        let refresh: InboundMessage =
            serde_json::from_str(r#"{"channel":"refresh-device-status"}"#).unwrap();
        assert_eq!(refresh.command, InboundCommand::RefreshDeviceStatus);
    }

    #[test]
    fn test_parse_write_tag() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"channel":"write-tag","data":"artwork-1"}"#).unwrap();
        assert_eq!(
            msg.command,
            InboundCommand::WriteTag {
                data: "artwork-1".to_string()
            }
        );
    }

    #[test]
    fn test_parse_subscription_requests() {
        let sub: InboundMessage = serde_json::from_str(
            r#"{"channel":"subscribe","channels":["write-result","device-status"]}"#,
        )
        .unwrap();
        assert_eq!(
            sub.command,
            InboundCommand::Subscribe {
                channels: vec![EventChannel::WriteResult, EventChannel::DeviceStatus]
            }
        );

        let unsub: InboundMessage =
            serde_json::from_str(r#"{"channel":"unsubscribe","channels":["card-detected"]}"#)
                .unwrap();
        assert_eq!(
            unsub.command,
            InboundCommand::Unsubscribe {
                channels: vec![EventChannel::CardDetected]
            }
        );
    }

    #[test]
    fn test_subscribe_to_unknown_channel_is_rejected() {
        let result: Result<InboundMessage, _> =
            serde_json::from_str(r#"{"channel":"subscribe","channels":["card-format"]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_inbound_channel_is_rejected() {
        let result: Result<InboundMessage, _> =
            serde_json::from_str(r#"{"channel":"format-tag"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_reply_json_shape() {
        let reply = CommandResult::err(Some(3), "write mode requires a non-empty payload");
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(
            json,
            json!({
                "channel": "reply",
                "request_id": 3,
                "success": false,
                "data": null,
                "error": "write mode requires a non-empty payload",
            })
        );
    }

    #[test]
    fn test_outbound_message_distinguishes_events_from_replies() {
        // Arrange
        let event_json = r#"{"channel":"card-removed","payload":{"uid":"01"}}"#;
        let reply_json = r#"{"channel":"reply","request_id":1,"success":true,"data":null,"error":null}"#;

        // Act
        let event: OutboundMessage = serde_json::from_str(event_json).unwrap();
        let reply: OutboundMessage = serde_json::from_str(reply_json).unwrap();

        // Assert
        assert!(matches!(event, OutboundMessage::Event(NfcEvent::CardRemoved(_))));
        assert!(matches!(reply, OutboundMessage::Reply(r) if r.success));
    }
}
