//! EventBridge: the single task that owns mode and device state.
//!
//! The bridge is the process-boundary multiplexer.  Commands come in through
//! a cloneable [`BridgeHandle`]; everything that happens (card taps, write
//! outcomes, reader changes, internal failures) goes out as an [`NfcEvent`]
//! on its own channel of the [`EventHub`].
//!
//! # Scheduling
//!
//! ```text
//!            ┌──────────── BridgeHandle (commands, biased first) ─┐
//!            │                                                     ▼
//! ReaderAdapter ── ReaderEvent ──► EventBridge::run (select!) ──► EventHub ──► subscribers
//!            ▲                         │        ▲
//!            └── spawned card / refresh task ───┘ (completion)
//! ```
//!
//! - Mode and status live in this task only; there are no locks around them.
//! - Hardware calls run as spawned tasks.  While one is in flight the loop
//!   still takes commands (a new mode applies to the *next* tap) but does not
//!   pull reader events.  Events queued meanwhile are handled after the
//!   outcome is emitted, so one card always reads detected, outcome, removed,
//!   and two writes can never overlap.
//! - A panic inside a hardware task is caught through its `JoinHandle` and
//!   reported on `service-error`; the loop keeps running.

use std::ops::ControlFlow;
use std::sync::Arc;

use patunay_core::{
    Card, CardEvent, DeviceStatus, ErrorKind, ErrorReport, EventChannel, Mode, ModeRequest, NfcEvent,
    ReaderInfo, SearchResult, TagCodec, ValidationError, WriteResult,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use super::card_operation::{self, CardError, TagRead};
use super::device_status::DeviceStatusTracker;
use super::event_hub::{EventHub, Subscription};
use super::mode_controller::{CardAction, ModeController};
use crate::infrastructure::reader::{HardwareError, ReaderAdapter, ReaderEvent};

/// Depth of the command queue between handles and the bridge task.
const COMMAND_QUEUE_DEPTH: usize = 64;

/// Errors returned to callers of [`BridgeHandle`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The command was rejected before reaching the bridge.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Re-enumerating readers failed.
    #[error("device refresh failed: {0}")]
    Refresh(#[source] HardwareError),

    /// The bridge task has stopped.
    #[error("bridge is not running")]
    Closed,
}

/// Unexpected failures inside the bridge, reported on `service-error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("reader adapter failed to start: {0}")]
    StartFailed(HardwareError),

    #[error("reader enumeration failed: {0}")]
    EnumerationFailed(HardwareError),

    #[error("reader monitor fault: {0}")]
    MonitorFault(HardwareError),

    #[error("reader monitor stopped")]
    MonitorStopped,

    #[error("{operation} task failed: {reason}")]
    TaskFailed {
        operation: &'static str,
        reason: String,
    },
}

impl ServiceError {
    fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::StartFailed(_)
            | ServiceError::EnumerationFailed(_)
            | ServiceError::MonitorFault(_) => ErrorKind::Hardware,
            ServiceError::MonitorStopped | ServiceError::TaskFailed { .. } => ErrorKind::Service,
        }
    }

    /// The hardware failure behind this error, for refresh callers.
    fn into_hardware(self) -> HardwareError {
        match self {
            ServiceError::StartFailed(e)
            | ServiceError::EnumerationFailed(e)
            | ServiceError::MonitorFault(e) => e,
            other => HardwareError::Io(other.to_string()),
        }
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

type RefreshReply = oneshot::Sender<Result<DeviceStatus, HardwareError>>;

enum Command {
    SetMode {
        request: ModeRequest,
        ack: oneshot::Sender<()>,
    },
    Refresh {
        reply: RefreshReply,
    },
    Shutdown,
}

/// Cheap, cloneable front door to a running [`EventBridge`].
#[derive(Clone)]
pub struct BridgeHandle {
    commands: mpsc::Sender<Command>,
    hub: EventHub,
    status: watch::Receiver<DeviceStatus>,
    mode: watch::Receiver<Mode>,
    card: watch::Receiver<Option<Card>>,
}

impl BridgeHandle {
    /// Changes the operating mode.  Resolves once the bridge has applied it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if the bridge has stopped.
    pub async fn set_mode(&self, request: ModeRequest) -> Result<(), BridgeError> {
        let (ack, applied) = oneshot::channel();
        self.send(Command::SetMode { request, ack }).await?;
        applied.await.map_err(|_| BridgeError::Closed)
    }

    /// Arms a single write of `text` for the next card tap.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] for empty text, without contacting
    /// the bridge.
    pub async fn write_tag(&self, text: impl Into<String>) -> Result<(), BridgeError> {
        self.set_mode(ModeRequest::write(text)?).await
    }

    /// Re-enumerates readers and emits a fresh `device-status` event.
    ///
    /// If the reader monitor failed to start or has stopped, it is started
    /// again first, so a successful refresh always leaves card taps flowing.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Refresh`] if enumeration failed (a
    /// `service-error` and the unchanged snapshot have been emitted by then).
    pub async fn refresh_device_status(&self) -> Result<DeviceStatus, BridgeError> {
        let (reply, result) = oneshot::channel();
        self.send(Command::Refresh { reply }).await?;
        result
            .await
            .map_err(|_| BridgeError::Closed)?
            .map_err(BridgeError::Refresh)
    }

    /// Last known device status.  Never waits on hardware.
    pub fn device_status(&self) -> DeviceStatus {
        self.status.borrow().clone()
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        self.mode.borrow().clone()
    }

    /// The tag in the field, with its frame bytes once it has been read.
    pub fn current_card(&self) -> Option<Card> {
        self.card.borrow().clone()
    }

    pub fn subscribe(&self, channel: EventChannel) -> Subscription {
        self.hub.subscribe(channel)
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.hub.subscribe_all()
    }

    /// Asks the bridge task to stop.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if it already has.
    pub async fn shutdown(&self) -> Result<(), BridgeError> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> Result<(), BridgeError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BridgeError::Closed)
    }
}

// ── Bridge task ───────────────────────────────────────────────────────────────

/// Card currently in the field, and the reader it sits on.
#[derive(Debug, Clone)]
struct PresentCard {
    reader: String,
    card: Card,
}

/// Result of a spawned hardware task, with the context needed to report it.
enum Completion {
    Read {
        uid: String,
        result: Result<TagRead, HardwareError>,
    },
    Write {
        uid: String,
        generation: u64,
        result: Result<String, CardError>,
    },
    Search {
        uid: String,
        result: Result<TagRead, HardwareError>,
    },
    Refresh {
        /// Event stream of a monitor (re)started by this refresh.
        events: Option<mpsc::UnboundedReceiver<ReaderEvent>>,
        result: Result<Vec<String>, ServiceError>,
    },
}

struct InFlight {
    operation: &'static str,
    uid: Option<String>,
    refresh_waiters: Vec<RefreshReply>,
    handle: JoinHandle<Completion>,
}

/// Owns the mode controller, the status tracker, and the reader event stream.
pub struct EventBridge {
    adapter: Arc<dyn ReaderAdapter>,
    codec: TagCodec,
    hub: EventHub,
    commands: mpsc::Receiver<Command>,
    modes: ModeController,
    mode_tx: watch::Sender<Mode>,
    card_tx: watch::Sender<Option<Card>>,
    status: DeviceStatusTracker,
    reader_events: Option<mpsc::UnboundedReceiver<ReaderEvent>>,
    adapter_started: bool,
    present: Option<PresentCard>,
    in_flight: Option<InFlight>,
    queued_refreshes: Vec<RefreshReply>,
}

impl EventBridge {
    /// Builds a bridge around `adapter` and returns it with its first handle.
    ///
    /// Nothing runs until [`EventBridge::run`] (or [`EventBridge::spawn`]) is
    /// called, so subscriptions taken from the handle before that see every
    /// event, including the initial `device-status`.
    pub fn new(adapter: Arc<dyn ReaderAdapter>, codec: TagCodec) -> (Self, BridgeHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (mode_tx, mode_rx) = watch::channel(Mode::Idle);
        let (card_tx, card_rx) = watch::channel(None);
        let status = DeviceStatusTracker::new();
        let hub = EventHub::new();

        let handle = BridgeHandle {
            commands: commands_tx,
            hub: hub.clone(),
            status: status.watch(),
            mode: mode_rx,
            card: card_rx,
        };
        let bridge = Self {
            adapter,
            codec,
            hub,
            commands,
            modes: ModeController::new(),
            mode_tx,
            card_tx,
            status,
            reader_events: None,
            adapter_started: false,
            present: None,
            in_flight: None,
            queued_refreshes: Vec::new(),
        };
        (bridge, handle)
    }

    /// Runs the bridge on a new Tokio task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until [`BridgeHandle::shutdown`] or until every handle is dropped.
    pub async fn run(mut self) {
        info!("NFC bridge starting");
        self.start_reader().await;

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.on_command(command).is_break() {
                            break;
                        }
                    }
                    None => {
                        debug!("all bridge handles dropped");
                        break;
                    }
                },

                joined = join_in_flight(&mut self.in_flight) => {
                    if let Some(in_flight) = self.in_flight.take() {
                        self.on_completion(in_flight, joined);
                    }
                    self.start_queued_refresh();
                }

                event = next_reader_event(&mut self.reader_events), if self.in_flight.is_none() => {
                    match event {
                        Some(event) => self.on_reader_event(event),
                        None => {
                            self.reader_events = None;
                            self.adapter_started = false;
                            warn!("reader event stream closed");
                            self.emit_service_error(&ServiceError::MonitorStopped, None);
                            let status = self.status.monitor_stopped();
                            self.emit(NfcEvent::DeviceStatus(status));
                        }
                    }
                }
            }
        }

        info!("NFC bridge stopped");
    }

    // ── Start-up ──────────────────────────────────────────────────────────────

    async fn start_reader(&mut self) {
        match self.adapter.start().await {
            Ok(events) => {
                self.reader_events = Some(events);
                self.adapter_started = true;
            }
            Err(e) => {
                error!("reader adapter failed to start: {e}");
                self.emit_service_error(&ServiceError::StartFailed(e), None);
                self.emit(NfcEvent::DeviceStatus(self.status.snapshot()));
                return;
            }
        }

        let status = match self.adapter.list_readers().await {
            Ok(readers) => {
                info!(readers = readers.len(), "reader adapter started");
                self.status.initialize(readers)
            }
            Err(e) => {
                warn!("initial reader enumeration failed: {e}");
                self.emit_service_error(&ServiceError::EnumerationFailed(e), None);
                self.status.snapshot()
            }
        };
        self.emit(NfcEvent::DeviceStatus(status));
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    fn on_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::SetMode { request, ack } => {
                self.modes.set_mode(request);
                self.publish_mode();
                // The caller may have given up waiting; the mode is applied regardless.
                let _ = ack.send(());
            }
            Command::Refresh { reply } => {
                self.queued_refreshes.push(reply);
                self.start_queued_refresh();
            }
            Command::Shutdown => {
                info!("shutdown requested");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn start_queued_refresh(&mut self) {
        if self.in_flight.is_some() || self.queued_refreshes.is_empty() {
            return;
        }
        let waiters = std::mem::take(&mut self.queued_refreshes);
        let adapter = Arc::clone(&self.adapter);
        let restart = !self.adapter_started;
        if restart {
            info!("reader monitor is not running; restarting it on refresh");
        }
        let handle = tokio::spawn(async move { refresh(adapter.as_ref(), restart).await });
        self.in_flight = Some(InFlight {
            operation: "refresh",
            uid: None,
            refresh_waiters: waiters,
            handle,
        });
    }

    // ── Reader events ─────────────────────────────────────────────────────────

    fn on_reader_event(&mut self, event: ReaderEvent) {
        match event {
            ReaderEvent::ReaderAttached(name) => {
                info!(reader = %name, "reader attached");
                let status = self.status.reader_attached(&name);
                self.emit(NfcEvent::ReaderConnected(ReaderInfo { name }));
                self.emit(NfcEvent::DeviceStatus(status));
            }
            ReaderEvent::ReaderDetached(name) => {
                info!(reader = %name, "reader detached");
                if let Some(present) = self.present.take_if_on(&name) {
                    self.publish_card();
                    self.emit(NfcEvent::CardRemoved(CardEvent::presence(present.card.uid)));
                }
                let status = self.status.reader_detached(&name);
                self.emit(NfcEvent::ReaderDisconnected(ReaderInfo { name }));
                self.emit(NfcEvent::DeviceStatus(status));
            }
            ReaderEvent::CardDetected { reader, uid } => self.on_card_detected(reader, uid),
            ReaderEvent::CardRemoved { reader, uid } => {
                debug!(%reader, %uid, "card removed");
                if self.present.as_ref().is_some_and(|p| p.card.uid == uid) {
                    self.present = None;
                    self.publish_card();
                }
                self.emit(NfcEvent::CardRemoved(CardEvent::presence(uid)));
            }
            ReaderEvent::Fault(e) => {
                error!("reader monitor fault: {e}");
                self.emit_service_error(&ServiceError::MonitorFault(e), None);
            }
        }
    }

    fn on_card_detected(&mut self, reader: String, uid: String) {
        debug!(%reader, %uid, mode = %self.modes.mode().kind(), "card detected");
        self.present = Some(PresentCard {
            reader: reader.clone(),
            card: Card::new(uid.clone()),
        });
        self.publish_card();

        let adapter = Arc::clone(&self.adapter);
        let codec = self.codec;
        let (operation, handle) = match self.modes.action_for_card() {
            CardAction::Announce => {
                self.emit(NfcEvent::CardDetected(CardEvent::presence(uid)));
                return;
            }
            CardAction::Read => {
                let task_uid = uid.clone();
                let handle = tokio::spawn(async move {
                    let result = card_operation::read_tag(adapter.as_ref(), &codec, &reader).await;
                    Completion::Read {
                        uid: task_uid,
                        result,
                    }
                });
                ("read", handle)
            }
            CardAction::Write { text, generation } => {
                self.emit(NfcEvent::CardDetected(CardEvent::presence(uid.clone())));
                let task_uid = uid.clone();
                let handle = tokio::spawn(async move {
                    let result =
                        card_operation::write_text(adapter.as_ref(), &codec, &reader, &text).await;
                    Completion::Write {
                        uid: task_uid,
                        generation,
                        result,
                    }
                });
                ("write", handle)
            }
            CardAction::Search => {
                self.emit(NfcEvent::CardDetected(CardEvent::presence(uid.clone())));
                let task_uid = uid.clone();
                let handle = tokio::spawn(async move {
                    let result = card_operation::read_tag(adapter.as_ref(), &codec, &reader).await;
                    Completion::Search {
                        uid: task_uid,
                        result,
                    }
                });
                ("search", handle)
            }
        };

        self.in_flight = Some(InFlight {
            operation,
            uid: Some(uid),
            refresh_waiters: Vec::new(),
            handle,
        });
    }

    // ── Completions ───────────────────────────────────────────────────────────

    fn on_completion(&mut self, in_flight: InFlight, joined: Result<Completion, JoinError>) {
        let InFlight {
            operation,
            uid,
            refresh_waiters,
            ..
        } = in_flight;

        let completion = match joined {
            Ok(completion) => completion,
            Err(e) => {
                let reason = if e.is_panic() {
                    "panicked".to_string()
                } else {
                    e.to_string()
                };
                error!(operation, "hardware task failed: {reason}");
                self.emit_service_error(
                    &ServiceError::TaskFailed { operation, reason },
                    uid.as_deref(),
                );
                if !refresh_waiters.is_empty() {
                    let status = self.status.snapshot();
                    self.emit(NfcEvent::DeviceStatus(status));
                    let failure = HardwareError::Io(format!("{operation} task failed"));
                    reply_all(refresh_waiters, Err(failure));
                }
                return;
            }
        };

        match completion {
            Completion::Read { uid, result } => match self.record_read(&uid, result) {
                Ok(text) => self.emit(NfcEvent::CardDetected(CardEvent::with_data(uid, text))),
                Err(e) => {
                    warn!(%uid, "tag read failed: {e}");
                    self.emit(NfcEvent::CardDetected(CardEvent::presence(uid.clone())));
                    self.emit_operation_error(&e, uid);
                }
            },
            Completion::Write {
                uid,
                generation,
                result,
            } => {
                let success = result.is_ok();
                let outcome = match result {
                    Ok(text) => {
                        info!(%uid, "tag written");
                        WriteResult::succeeded(&uid, text)
                    }
                    Err(e) => {
                        warn!(%uid, "tag write failed: {e}");
                        WriteResult::failed(&uid, e.to_string())
                    }
                };
                // Mode first, so observers of the result already see Idle.
                if self.modes.complete_write(generation, success) {
                    self.publish_mode();
                }
                self.emit(NfcEvent::WriteResult(outcome));
            }
            Completion::Search { uid, result } => match self.record_read(&uid, result) {
                Ok(text) => self.emit(NfcEvent::CardSearchResult(SearchResult::now(uid, text))),
                Err(e) => {
                    warn!(%uid, "tag search read failed: {e}");
                    self.emit_operation_error(&e, uid);
                }
            },
            Completion::Refresh { events, result } => {
                if let Some(events) = events {
                    info!("reader monitor restarted");
                    self.reader_events = Some(events);
                    self.adapter_started = true;
                }
                match result {
                    // Enumeration only runs once the monitor is up.
                    Ok(readers) => {
                        let status = self.status.initialize(readers);
                        self.emit(NfcEvent::DeviceStatus(status.clone()));
                        reply_all(refresh_waiters, Ok(status));
                    }
                    Err(e) => {
                        warn!("reader refresh failed: {e}");
                        self.emit_service_error(&e, None);
                        self.emit(NfcEvent::DeviceStatus(self.status.snapshot()));
                        reply_all(refresh_waiters, Err(e.into_hardware()));
                    }
                }
            }
        }
    }

    /// Stores the frame bytes on the present card and yields the text.
    fn record_read(
        &mut self,
        uid: &str,
        result: Result<TagRead, HardwareError>,
    ) -> Result<String, CardError> {
        let read = result?;
        if let Some(present) = self.present.as_mut().filter(|p| p.card.uid == uid) {
            present.card.raw_data = Some(read.raw.clone());
            self.publish_card();
        }
        read.into_text()
    }

    // ── Emission ──────────────────────────────────────────────────────────────

    fn emit(&self, event: NfcEvent) {
        debug!(channel = %event.channel(), "emit");
        self.hub.publish(event);
    }

    fn emit_operation_error(&self, error: &CardError, uid: String) {
        let report = ErrorReport::new(error.kind(), error.to_string()).for_card(uid);
        self.emit(NfcEvent::OperationError(report));
    }

    fn emit_service_error(&self, error: &ServiceError, uid: Option<&str>) {
        let mut report = ErrorReport::new(error.kind(), error.to_string());
        if let Some(uid) = uid {
            report = report.for_card(uid);
        }
        self.emit(NfcEvent::ServiceError(report));
    }

    fn publish_mode(&self) {
        self.mode_tx.send_replace(self.modes.mode().clone());
    }

    fn publish_card(&self) {
        self.card_tx
            .send_replace(self.present.as_ref().map(|p| p.card.clone()));
    }
}

trait TakeIfOn {
    fn take_if_on(&mut self, reader: &str) -> Option<PresentCard>;
}

impl TakeIfOn for Option<PresentCard> {
    /// Takes the present card if it sits on `reader`.
    fn take_if_on(&mut self, reader: &str) -> Option<PresentCard> {
        if self.as_ref().is_some_and(|p| p.reader == reader) {
            self.take()
        } else {
            None
        }
    }
}

fn reply_all(waiters: Vec<RefreshReply>, result: Result<DeviceStatus, HardwareError>) {
    for waiter in waiters {
        // A caller that stopped waiting still got the device-status event.
        let _ = waiter.send(result.clone());
    }
}

/// Re-enumerates readers, first starting the monitor when `restart` is set.
async fn refresh(adapter: &dyn ReaderAdapter, restart: bool) -> Completion {
    let events = if restart {
        match adapter.start().await {
            Ok(events) => Some(events),
            Err(e) => {
                return Completion::Refresh {
                    events: None,
                    result: Err(ServiceError::StartFailed(e)),
                }
            }
        }
    } else {
        None
    };
    Completion::Refresh {
        events,
        result: adapter
            .list_readers()
            .await
            .map_err(ServiceError::EnumerationFailed),
    }
}

async fn join_in_flight(slot: &mut Option<InFlight>) -> Result<Completion, JoinError> {
    match slot.as_mut() {
        Some(in_flight) => (&mut in_flight.handle).await,
        None => std::future::pending().await,
    }
}

async fn next_reader_event(
    events: &mut Option<mpsc::UnboundedReceiver<ReaderEvent>>,
) -> Option<ReaderEvent> {
    match events.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
