//! PC/SC reader backend (ACR122U-class contactless readers).
//!
//! # How it works
//!
//! PC/SC calls block, so nothing here runs on the async executor directly:
//!
//! - A dedicated monitor thread owns its own [`Context`] and loops on
//!   `get_status_change` over the PnP pseudo-reader plus every known reader.
//!   A PnP change triggers a re-enumeration, which is diffed against the
//!   previous reader list.  A reader whose state flips to `PRESENT` gets its
//!   uid read with GET DATA and is reported as a card.  A failed
//!   enumeration or uid read is sent as [`ReaderEvent::Fault`].
//! - Block I/O runs on `spawn_blocking` with a short-lived connection and a
//!   transaction around all the APDUs of one call.
//!
//! The monitor exits on its own once the event receiver is dropped; the
//! status-change timeout bounds how long that takes.
//!
//! # APDUs (pseudo-APDUs interpreted by the reader firmware)
//!
//! | Command      | Bytes                          |
//! |--------------|--------------------------------|
//! | GET UID      | `FF CA 00 00 00`               |
//! | READ BINARY  | `FF B0 00 <block> <len>`       |
//! | UPDATE BINARY| `FF D6 00 <block> <len> <data>`|
//!
//! Every response ends in a status word; anything but `90 00` is a failure.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use ::pcsc::{
    Card, Context, Error as PcscError, Protocols, ReaderState, Scope, ShareMode, State,
    Transaction, MAX_BUFFER_SIZE, PNP_NOTIFICATION,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{HardwareError, ReaderAdapter, ReaderEvent};

/// Largest READ BINARY the reader firmware answers in one APDU.
const MAX_READ_CHUNK: usize = 16;

/// PC/SC-backed implementation of [`ReaderAdapter`].
///
/// The service context is established on first use and cached, so a bridge
/// launched while the smart-card service is down recovers on a later refresh.
pub struct PcscReader {
    ctx: Mutex<Option<Context>>,
    poll_interval: Duration,
}

impl PcscReader {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            ctx: Mutex::new(None),
            poll_interval,
        }
    }

    fn context(&self) -> Result<Context, HardwareError> {
        let mut slot = self.ctx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ctx) = slot.as_ref() {
            return Ok(ctx.clone());
        }
        let ctx = establish()?;
        *slot = Some(ctx.clone());
        Ok(ctx)
    }
}

fn establish() -> Result<Context, HardwareError> {
    Context::establish(Scope::User)
        .map_err(|e| HardwareError::ReaderUnavailable(format!("PC/SC service: {e}")))
}

#[async_trait]
impl ReaderAdapter for PcscReader {
    async fn start(&self) -> Result<mpsc::UnboundedReceiver<ReaderEvent>, HardwareError> {
        let ctx = establish()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let poll = self.poll_interval;

        std::thread::Builder::new()
            .name("pcsc-monitor".into())
            .spawn(move || monitor(ctx, tx, poll))
            .map_err(|e| HardwareError::Io(format!("failed to spawn monitor thread: {e}")))?;

        info!("PC/SC monitor started");
        Ok(rx)
    }

    async fn list_readers(&self) -> Result<Vec<String>, HardwareError> {
        let ctx = self.context()?;
        let result = blocking(move || {
            Ok(enumerate(&ctx)?
                .iter()
                .map(|name| name.to_string_lossy().into_owned())
                .collect())
        })
        .await;
        if matches!(result, Err(HardwareError::ReaderUnavailable(_))) {
            // Service went away; re-establish on the next call.
            *self.ctx.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }
        result
    }

    async fn read_blocks(
        &self,
        reader: &str,
        block: u8,
        length: usize,
        block_size: usize,
    ) -> Result<Vec<u8>, HardwareError> {
        let ctx = self.context()?;
        let name = reader_name(reader)?;
        blocking(move || {
            let mut card = connect(&ctx, &name)?;
            let tx = card.transaction().map_err(map_pcsc_error)?;

            let chunk = ((MAX_READ_CHUNK / block_size.max(1)).max(1)) * block_size.max(1);
            let mut out = Vec::with_capacity(length);
            let mut current = block as usize;
            while out.len() < length {
                let want = chunk.min(length - out.len());
                let apdu = read_apdu(block_number(current)?, want)?;
                let data = transmit(&tx, &apdu)?;
                if data.len() < want {
                    return Err(HardwareError::MalformedResponse(format!(
                        "expected {want} bytes from block {current}, got {}",
                        data.len()
                    )));
                }
                out.extend_from_slice(&data[..want]);
                current += want.div_ceil(block_size.max(1));
            }
            Ok(out)
        })
        .await
    }

    async fn write_blocks(
        &self,
        reader: &str,
        block: u8,
        data: &[u8],
        block_size: usize,
    ) -> Result<(), HardwareError> {
        let ctx = self.context()?;
        let name = reader_name(reader)?;
        let data = data.to_vec();
        blocking(move || {
            let mut card = connect(&ctx, &name)?;
            let tx = card.transaction().map_err(map_pcsc_error)?;

            for (i, chunk) in data.chunks(block_size.max(1)).enumerate() {
                let apdu = write_apdu(block_number(block as usize + i)?, chunk)?;
                transmit(&tx, &apdu)?;
            }
            debug!(bytes = data.len(), "PC/SC write complete");
            Ok(())
        })
        .await
    }
}

// ── Monitor thread ────────────────────────────────────────────────────────────

fn monitor(ctx: Context, tx: mpsc::UnboundedSender<ReaderEvent>, poll: Duration) {
    let mut states = vec![ReaderState::new(PNP_NOTIFICATION(), State::UNAWARE)];
    let mut tracker = ReaderTracker::default();
    let mut rescan = true;

    while !tx.is_closed() {
        if rescan {
            // A failed enumeration stays pending until the next PnP change.
            rescan = false;
            for event in tracker.rescan(enumerate(&ctx)) {
                let _ = tx.send(event);
            }
            sync_states(&mut states, &tracker.known);
        }

        match ctx.get_status_change(poll, &mut states) {
            Ok(()) => {}
            Err(PcscError::Timeout) => continue,
            Err(e @ (PcscError::ServiceStopped | PcscError::NoService)) => {
                let _ = tx.send(ReaderEvent::Fault(HardwareError::ReaderUnavailable(format!(
                    "PC/SC service: {e}"
                ))));
                break;
            }
            Err(e) => {
                warn!("get_status_change failed: {e}");
                std::thread::sleep(Duration::from_millis(100));
                continue;
            }
        }

        if states[0].event_state().intersects(State::CHANGED) {
            rescan = true;
        }
        states[0].sync_current_state();

        for rs in states.iter_mut().skip(1) {
            let event = rs.event_state();
            if event.intersects(State::CHANGED) {
                let name = rs.name().to_owned();
                let is_present = event.intersects(State::PRESENT);
                if let Some(event) = tracker.card_state(name, is_present, |n| read_uid(&ctx, n)) {
                    let _ = tx.send(event);
                }
            }
            rs.sync_current_state();
        }
    }

    info!("PC/SC monitor stopped");
}

/// Reader and card bookkeeping of the monitor thread, kept apart from the
/// PC/SC calls that feed it.
#[derive(Debug, Default)]
struct ReaderTracker {
    known: Vec<CString>,
    present: HashMap<CString, String>,
    enumeration_failing: bool,
}

impl ReaderTracker {
    /// Diffs a fresh enumeration against the known readers.
    ///
    /// A failed enumeration leaves the known readers untouched and is
    /// reported once until an enumeration succeeds again.
    fn rescan(&mut self, current: Result<Vec<CString>, HardwareError>) -> Vec<ReaderEvent> {
        let current = match current {
            Ok(current) => current,
            Err(e) => {
                warn!("reader enumeration failed: {e}");
                if std::mem::replace(&mut self.enumeration_failing, true) {
                    return Vec::new();
                }
                return vec![ReaderEvent::Fault(e)];
            }
        };
        self.enumeration_failing = false;

        let mut events = Vec::new();
        for name in current.iter().filter(|n| !self.known.contains(n)) {
            events.push(ReaderEvent::ReaderAttached(name.to_string_lossy().into_owned()));
        }
        for name in self.known.iter().filter(|n| !current.contains(n)) {
            let reader = name.to_string_lossy().into_owned();
            if let Some(uid) = self.present.remove(name) {
                events.push(ReaderEvent::CardRemoved {
                    reader: reader.clone(),
                    uid,
                });
            }
            events.push(ReaderEvent::ReaderDetached(reader));
        }
        self.known = current;
        events
    }

    /// Folds a presence change on `name` into a card event.
    ///
    /// A card whose uid cannot be read is reported as a fault and not
    /// recorded, so its removal stays silent.
    fn card_state(
        &mut self,
        name: CString,
        is_present: bool,
        read_uid: impl FnOnce(&CStr) -> Result<String, HardwareError>,
    ) -> Option<ReaderEvent> {
        let reader = name.to_string_lossy().into_owned();
        let was_present = self.present.contains_key(&name);

        if is_present && !was_present {
            match read_uid(&name) {
                Ok(uid) => {
                    self.present.insert(name, uid.clone());
                    Some(ReaderEvent::CardDetected { reader, uid })
                }
                Err(e) => {
                    warn!("card on {reader} did not report a uid: {e}");
                    Some(ReaderEvent::Fault(e))
                }
            }
        } else if !is_present && was_present {
            self.present
                .remove(&name)
                .map(|uid| ReaderEvent::CardRemoved { reader, uid })
        } else {
            None
        }
    }
}

/// Keeps one status entry per known reader behind the PnP entry.
fn sync_states(states: &mut Vec<ReaderState>, known: &[CString]) {
    states.retain(|s| {
        s.name() == PNP_NOTIFICATION() || known.iter().any(|k| k.as_c_str() == s.name())
    });
    for name in known {
        if !states.iter().any(|s| s.name() == name.as_c_str()) {
            states.push(ReaderState::new(name.clone(), State::UNAWARE));
        }
    }
}

// ── Blocking helpers ──────────────────────────────────────────────────────────

async fn blocking<T, F>(f: F) -> Result<T, HardwareError>
where
    F: FnOnce() -> Result<T, HardwareError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| HardwareError::Io(format!("reader task failed: {e}")))?
}

fn enumerate(ctx: &Context) -> Result<Vec<CString>, HardwareError> {
    let mut buf = [0u8; 2048];
    match ctx.list_readers(&mut buf) {
        Ok(names) => Ok(names.map(CStr::to_owned).collect()),
        Err(PcscError::NoReadersAvailable) => Ok(Vec::new()),
        Err(e) => Err(map_pcsc_error(e)),
    }
}

fn connect(ctx: &Context, name: &CStr) -> Result<Card, HardwareError> {
    ctx.connect(name, ShareMode::Shared, Protocols::ANY)
        .map_err(map_pcsc_error)
}

fn read_uid(ctx: &Context, name: &CStr) -> Result<String, HardwareError> {
    let card = connect(ctx, name)?;
    let mut buf = [0u8; MAX_BUFFER_SIZE];
    let response = card
        .transmit(&GET_UID_APDU, &mut buf)
        .map_err(map_pcsc_error)?;
    let uid = split_status(response)?;
    if uid.is_empty() {
        return Err(HardwareError::MalformedResponse("empty uid".into()));
    }
    Ok(hex_upper(&uid))
}

fn transmit(tx: &Transaction<'_>, apdu: &[u8]) -> Result<Vec<u8>, HardwareError> {
    let mut buf = [0u8; MAX_BUFFER_SIZE];
    let response = tx.transmit(apdu, &mut buf).map_err(map_pcsc_error)?;
    split_status(response)
}

fn reader_name(reader: &str) -> Result<CString, HardwareError> {
    CString::new(reader)
        .map_err(|_| HardwareError::ReaderUnavailable(format!("invalid reader name {reader:?}")))
}

fn block_number(block: usize) -> Result<u8, HardwareError> {
    u8::try_from(block).map_err(|_| HardwareError::Io(format!("block {block} is out of range")))
}

fn map_pcsc_error(e: PcscError) -> HardwareError {
    match e {
        PcscError::RemovedCard | PcscError::NoSmartcard => HardwareError::CardRemoved,
        PcscError::ReaderUnavailable
        | PcscError::UnknownReader
        | PcscError::NoService
        | PcscError::ServiceStopped
        | PcscError::InvalidHandle => {
            HardwareError::ReaderUnavailable(e.to_string())
        }
        PcscError::Timeout => HardwareError::Timeout,
        other => HardwareError::Io(other.to_string()),
    }
}

// ── APDU encoding ─────────────────────────────────────────────────────────────

const GET_UID_APDU: [u8; 5] = [0xFF, 0xCA, 0x00, 0x00, 0x00];

fn read_apdu(block: u8, len: usize) -> Result<[u8; 5], HardwareError> {
    let len = u8::try_from(len)
        .map_err(|_| HardwareError::Io(format!("read length {len} exceeds one APDU")))?;
    Ok([0xFF, 0xB0, 0x00, block, len])
}

fn write_apdu(block: u8, data: &[u8]) -> Result<Vec<u8>, HardwareError> {
    let len = u8::try_from(data.len())
        .map_err(|_| HardwareError::Io(format!("write length {} exceeds one APDU", data.len())))?;
    let mut apdu = Vec::with_capacity(5 + data.len());
    apdu.extend_from_slice(&[0xFF, 0xD6, 0x00, block, len]);
    apdu.extend_from_slice(data);
    Ok(apdu)
}

/// Strips the trailing status word, failing unless it is `90 00`.
fn split_status(response: &[u8]) -> Result<Vec<u8>, HardwareError> {
    match response {
        [data @ .., 0x90, 0x00] => Ok(data.to_vec()),
        [.., sw1, sw2] => Err(HardwareError::Io(format!(
            "reader returned status {sw1:02X} {sw2:02X}"
        ))),
        _ => Err(HardwareError::MalformedResponse(format!(
            "response of {} bytes has no status word",
            response.len()
        ))),
    }
}

fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_status_accepts_success() {
        assert_eq!(split_status(&[0x04, 0xA1, 0x90, 0x00]), Ok(vec![0x04, 0xA1]));
    }

    #[test]
    fn test_split_status_rejects_error_status() {
        assert!(matches!(split_status(&[0x63, 0x00]), Err(HardwareError::Io(_))));
    }

    #[test]
    fn test_split_status_rejects_short_response() {
        assert!(matches!(
            split_status(&[0x90]),
            Err(HardwareError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_read_apdu_layout() {
        assert_eq!(read_apdu(4, 16).unwrap(), [0xFF, 0xB0, 0x00, 0x04, 0x10]);
    }

    #[test]
    fn test_write_apdu_layout() {
        assert_eq!(
            write_apdu(5, &[1, 2, 3, 4]).unwrap(),
            vec![0xFF, 0xD6, 0x00, 0x05, 0x04, 1, 2, 3, 4]
        );
    }

    fn name(reader: &str) -> CString {
        CString::new(reader).unwrap()
    }

    #[test]
    fn test_rescan_reports_new_and_vanished_readers() {
        // Arrange
        let mut tracker = ReaderTracker::default();
        tracker.rescan(Ok(vec![name("A")]));
        tracker.card_state(name("A"), true, |_| Ok("04A1".into()));

        // Act
        let events = tracker.rescan(Ok(vec![name("B")]));

        // Assert
        assert_eq!(
            events,
            vec![
                ReaderEvent::ReaderAttached("B".into()),
                ReaderEvent::CardRemoved {
                    reader: "A".into(),
                    uid: "04A1".into()
                },
                ReaderEvent::ReaderDetached("A".into()),
            ]
        );
    }

    #[test]
    fn test_failed_enumeration_keeps_known_readers() {
        // Arrange
        let mut tracker = ReaderTracker::default();
        tracker.rescan(Ok(vec![name("A")]));
        tracker.card_state(name("A"), true, |_| Ok("04A1".into()));
        let failure = HardwareError::Io("list failed".into());

        // Act
        let first = tracker.rescan(Err(failure.clone()));
        let second = tracker.rescan(Err(failure.clone()));
        let recovered = tracker.rescan(Ok(vec![name("A")]));

        // Assert: one fault, no detach, no phantom removal
        assert_eq!(first, vec![ReaderEvent::Fault(failure)]);
        assert!(second.is_empty());
        assert!(recovered.is_empty());
        assert_eq!(tracker.known, vec![name("A")]);
        assert!(tracker.present.contains_key(&name("A")));
    }

    #[test]
    fn test_unreadable_uid_is_reported_as_fault() {
        // Arrange
        let mut tracker = ReaderTracker::default();
        tracker.rescan(Ok(vec![name("A")]));

        // Act
        let arrived = tracker.card_state(name("A"), true, |_| Err(HardwareError::Timeout));
        let left = tracker.card_state(name("A"), false, |_| unreachable!());

        // Assert
        assert_eq!(arrived, Some(ReaderEvent::Fault(HardwareError::Timeout)));
        assert_eq!(left, None);
    }

    #[test]
    fn test_card_presence_round_trip() {
        let mut tracker = ReaderTracker::default();

        let arrived = tracker.card_state(name("A"), true, |_| Ok("04A1".into()));
        let again = tracker.card_state(name("A"), true, |_| unreachable!());
        let left = tracker.card_state(name("A"), false, |_| unreachable!());

        assert_eq!(
            arrived,
            Some(ReaderEvent::CardDetected {
                reader: "A".into(),
                uid: "04A1".into()
            })
        );
        assert_eq!(again, None);
        assert_eq!(
            left,
            Some(ReaderEvent::CardRemoved {
                reader: "A".into(),
                uid: "04A1".into()
            })
        );
    }

    #[test]
    fn test_uid_is_upper_hex() {
        assert_eq!(hex_upper(&[0x04, 0xa1, 0x0b]), "04A10B");
    }
}
