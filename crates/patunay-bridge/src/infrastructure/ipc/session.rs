//! One UI shell session over a newline-delimited JSON stream.
//!
//! Each inbound line is one [`InboundMessage`].  Each outbound line is one
//! [`OutboundMessage`]: either an event from a channel the session is
//! subscribed to, or a reply to a command that carried a `request_id`.
//!
//! # Ordering
//!
//! The session holds a single all-channel subscription and filters it, so
//! events reach the UI shell in exactly the order the bridge emitted them,
//! across channels.  Events the bridge emitted while a command was being
//! handled are flushed before that command's reply.
//!
//! # Malformed input
//!
//! A line that is not valid JSON, or names an unknown command, is answered
//! with a failed reply when a `request_id` can be recovered from it and with a
//! `service-error` event of kind `validation` otherwise.  The session carries
//! on either way.

use std::collections::HashSet;
use std::future::Future;

use anyhow::Context;
use patunay_core::{
    CommandResult, ErrorKind, ErrorReport, EventChannel, InboundCommand, InboundMessage,
    ModeRequest, NfcEvent, OutboundMessage,
};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::application::event_bridge::BridgeHandle;
use crate::application::event_hub::Subscription;

/// Command handling state for one connected UI shell.
pub struct IpcSession {
    handle: BridgeHandle,
    channels: HashSet<EventChannel>,
}

impl IpcSession {
    /// Creates a session forwarding every event channel.
    pub fn new(handle: BridgeHandle) -> Self {
        Self {
            handle,
            channels: EventChannel::ALL.into_iter().collect(),
        }
    }

    /// Whether events on `channel` are forwarded to this session.
    pub fn forwards(&self, channel: EventChannel) -> bool {
        self.channels.contains(&channel)
    }

    /// Handles one inbound line and returns what should be written back, if
    /// anything.  Commands without a `request_id` succeed silently.
    pub async fn handle_line(&mut self, line: &str) -> Option<OutboundMessage> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => return Some(rejected(None, format!("invalid JSON: {e}"))),
        };
        let request_id = value.get("request_id").and_then(Value::as_u64);
        let message: InboundMessage = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(e) => return Some(rejected(request_id, format!("unrecognised command: {e}"))),
        };

        debug!(request_id = ?message.request_id, "inbound command");
        match (self.execute(message.command).await, message.request_id) {
            (Ok(data), Some(id)) => Some(OutboundMessage::Reply(CommandResult::ok(Some(id), data))),
            (Ok(_), None) => None,
            (Err(error), id) => {
                warn!("command failed: {error}");
                Some(rejected(id, error))
            }
        }
    }

    async fn execute(&mut self, command: InboundCommand) -> Result<Option<Value>, String> {
        match command {
            InboundCommand::SetMode { mode, data } => {
                let request = ModeRequest::parse(&mode, data).map_err(|e| e.to_string())?;
                self.handle
                    .set_mode(request)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(None)
            }
            InboundCommand::WriteTag { data } => {
                self.handle.write_tag(data).await.map_err(|e| e.to_string())?;
                Ok(None)
            }
            InboundCommand::GetDeviceStatus => to_data(&self.handle.device_status()),
            InboundCommand::RefreshDeviceStatus => {
                let status = self
                    .handle
                    .refresh_device_status()
                    .await
                    .map_err(|e| e.to_string())?;
                to_data(&status)
            }
            InboundCommand::Subscribe { channels } => {
                self.channels.extend(channels);
                to_data(&self.subscribed())
            }
            InboundCommand::Unsubscribe { channels } => {
                for channel in channels {
                    self.channels.remove(&channel);
                }
                to_data(&self.subscribed())
            }
        }
    }

    /// Subscribed channels in their stable order.
    fn subscribed(&self) -> Vec<EventChannel> {
        EventChannel::ALL
            .into_iter()
            .filter(|channel| self.channels.contains(channel))
            .collect()
    }
}

fn to_data<T: serde::Serialize>(value: &T) -> Result<Option<Value>, String> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| format!("failed to encode reply: {e}"))
}

fn rejected(request_id: Option<u64>, error: impl Into<String>) -> OutboundMessage {
    let error = error.into();
    match request_id {
        Some(_) => OutboundMessage::Reply(CommandResult::err(request_id, error)),
        None => OutboundMessage::Event(NfcEvent::ServiceError(ErrorReport::new(
            ErrorKind::Validation,
            error,
        ))),
    }
}

// ── Transport loop ────────────────────────────────────────────────────────────

/// Serves one session until `input` reaches end of stream.
///
/// The session subscribes to the bridge when this is called, not when the
/// returned future is first polled, so spawning it before the bridge starts
/// guarantees it sees the initial `device-status`.
///
/// # Errors
///
/// The future fails if reading `input` or writing `output` fails.
pub fn serve<R, W>(
    handle: BridgeHandle,
    input: R,
    mut output: W,
) -> impl Future<Output = anyhow::Result<()>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut events = handle.subscribe_all();
    let mut session = IpcSession::new(handle);

    async move {
        let mut lines = input.lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("failed to read command stream")? else {
                        info!("command stream closed");
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let response = session.handle_line(&line).await;
                    flush_queued(&session, &mut events, &mut output).await?;
                    if let Some(response) = response {
                        write_message(&mut output, &response).await?;
                    }
                }

                event = events.recv() => match event {
                    Some(event) => {
                        if session.forwards(event.channel()) {
                            write_message(&mut output, &OutboundMessage::Event(event)).await?;
                        }
                    }
                    None => {
                        info!("bridge stopped; closing session");
                        break;
                    }
                },
            }
        }
        Ok(())
    }
}

async fn flush_queued<W>(
    session: &IpcSession,
    events: &mut Subscription,
    output: &mut W,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = events.try_recv() {
        if session.forwards(event.channel()) {
            write_message(output, &OutboundMessage::Event(event)).await?;
        }
    }
    Ok(())
}

async fn write_message<W>(output: &mut W, message: &OutboundMessage) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(message).context("failed to encode outbound message")?;
    line.push(b'\n');
    output
        .write_all(&line)
        .await
        .context("failed to write outbound message")?;
    output.flush().await.context("failed to flush output")?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use patunay_core::{Mode, TagCodec};
    use tokio::io::{duplex, split, BufReader, DuplexStream, Lines};

    use super::*;
    use crate::application::event_bridge::EventBridge;
    use crate::infrastructure::reader::mock::MockReader;

    const READER: &str = "Mock Reader 0";

    struct Harness {
        mock: MockReader,
        handle: BridgeHandle,
        to_bridge: tokio::io::WriteHalf<DuplexStream>,
        from_bridge: Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
    }

    impl Harness {
        async fn start() -> Self {
            let mock = MockReader::with_readers([READER]);
            let (bridge, handle) = EventBridge::new(Arc::new(mock.clone()), TagCodec::default());

            let (client, server) = duplex(16 * 1024);
            let (server_rx, server_tx) = split(server);
            tokio::spawn(serve(handle.clone(), BufReader::new(server_rx), server_tx));
            bridge.spawn();

            let (client_rx, to_bridge) = split(client);
            let mut harness = Self {
                mock,
                handle,
                to_bridge,
                from_bridge: BufReader::new(client_rx).lines(),
            };
            // Initial device-status.
            let first = harness.next().await;
            assert_eq!(first["channel"], "device-status");
            harness
        }

        async fn send(&mut self, line: &str) {
            self.to_bridge.write_all(line.as_bytes()).await.unwrap();
            self.to_bridge.write_all(b"\n").await.unwrap();
        }

        async fn next(&mut self) -> Value {
            let line = tokio::time::timeout(Duration::from_secs(2), self.from_bridge.next_line())
                .await
                .expect("line within timeout")
                .unwrap()
                .expect("stream open");
            serde_json::from_str(&line).unwrap()
        }
    }

    #[tokio::test]
    async fn test_set_mode_with_request_id_gets_success_reply() {
        // Arrange
        let mut h = Harness::start().await;

        // Act
        h.send(r#"{"channel":"set-mode","mode":"search","request_id":1}"#).await;
        let reply = h.next().await;

        // Assert
        assert_eq!(reply["channel"], "reply");
        assert_eq!(reply["request_id"], 1);
        assert_eq!(reply["success"], true);
        assert_eq!(h.handle.mode(), Mode::Search);
    }

    #[tokio::test]
    async fn test_write_mode_without_data_is_rejected_and_mode_kept() {
        // Arrange
        let mut h = Harness::start().await;
        h.send(r#"{"channel":"set-mode","mode":"read","request_id":1}"#).await;
        h.next().await;

        // Act
        h.send(r#"{"channel":"set-mode","mode":"write","request_id":2}"#).await;
        let reply = h.next().await;

        // Assert
        assert_eq!(reply["success"], false);
        assert_eq!(reply["error"], "write mode requires a non-empty payload");
        assert_eq!(h.handle.mode(), Mode::Read);
    }

    #[tokio::test]
    async fn test_get_device_status_replies_with_snapshot() {
        let mut h = Harness::start().await;

        h.send(r#"{"channel":"get-device-status","request_id":9}"#).await;
        let reply = h.next().await;

        assert_eq!(reply["request_id"], 9);
        assert_eq!(reply["data"]["available"], true);
        assert_eq!(reply["data"]["readers"][0], READER);
    }

    #[tokio::test]
    async fn test_refresh_emits_device_status_before_reply() {
        let mut h = Harness::start().await;

        h.send(r#"{"channel":"refresh-device-status","request_id":4}"#).await;
        let event = h.next().await;
        let reply = h.next().await;

        assert_eq!(event["channel"], "device-status");
        assert_eq!(reply["channel"], "reply");
        assert_eq!(reply["data"]["initialized"], true);
    }

    #[tokio::test]
    async fn test_malformed_json_without_request_id_becomes_validation_error() {
        let mut h = Harness::start().await;

        h.send("{not json").await;
        let event = h.next().await;

        assert_eq!(event["channel"], "service-error");
        assert_eq!(event["payload"]["kind"], "validation");
    }

    #[tokio::test]
    async fn test_unknown_command_with_request_id_gets_failed_reply() {
        let mut h = Harness::start().await;

        h.send(r#"{"channel":"format-tag","request_id":5}"#).await;
        let reply = h.next().await;

        assert_eq!(reply["request_id"], 5);
        assert_eq!(reply["success"], false);
    }

    #[tokio::test]
    async fn test_unsubscribed_channel_is_not_forwarded() {
        // Arrange: drop card-detected for this session
        let mut h = Harness::start().await;
        h.send(r#"{"channel":"unsubscribe","channels":["card-detected"],"request_id":1}"#)
            .await;
        let reply = h.next().await;
        assert!(!reply["data"]
            .as_array()
            .unwrap()
            .contains(&Value::from("card-detected")));

        // Act
        h.mock.tap(READER, "04A1");
        h.mock.remove(READER);

        // Assert: the removal arrives, the detection never does
        let event = h.next().await;
        assert_eq!(event["channel"], "card-removed");
        assert_eq!(event["payload"]["uid"], "04A1");
    }

    #[tokio::test]
    async fn test_write_tag_then_tap_produces_write_result() {
        // Arrange
        let mut h = Harness::start().await;
        h.send(r#"{"channel":"write-tag","data":"artwork-1","request_id":1}"#).await;
        assert_eq!(h.next().await["success"], true);

        // Act
        h.mock.tap(READER, "04A1");

        // Assert
        let detected = h.next().await;
        let result = h.next().await;
        assert_eq!(detected["channel"], "card-detected");
        assert_eq!(result["channel"], "write-result");
        assert_eq!(result["payload"]["success"], true);
        assert_eq!(result["payload"]["data"], "artwork-1");
    }
}
