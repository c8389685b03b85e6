//! In-memory reader backend.
//!
//! Lets tests (and UI developers without hardware, via `--backend mock`)
//! attach readers, tap tags, and inject hardware failures without a PC/SC
//! stack.  Tag memory is a flat byte array addressed by absolute block.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use patunay_core::{FormatError, TagCodec};
use tokio::sync::{mpsc, Notify, Semaphore};

use super::{HardwareError, ReaderAdapter, ReaderEvent};

/// Size of a blank mock tag (NTAG213: 45 pages of 4 bytes).
pub const DEFAULT_TAG_BYTES: usize = 180;

/// Holds reader I/O calls until the test lets them through.
///
/// Obtained from [`MockReader::hold_io`].  Every `read_blocks`/`write_blocks`
/// call signals [`IoGate::wait_entered`] and then waits for one permit.
#[derive(Debug, Clone)]
pub struct IoGate {
    permits: Arc<Semaphore>,
    entered: Arc<Notify>,
}

impl IoGate {
    fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
            entered: Arc::new(Notify::new()),
        }
    }

    /// Resolves once an I/O call is parked at the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Lets `n` parked (or future) I/O calls proceed.
    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }

    async fn pass(&self) {
        self.entered.notify_one();
        // A closed semaphore means the gate was opened for good.
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

#[derive(Default)]
struct Failures {
    start: Option<HardwareError>,
    list: Option<HardwareError>,
    read: Option<HardwareError>,
    write: Option<HardwareError>,
}

#[derive(Default)]
struct MockState {
    readers: Vec<String>,
    /// Tag memory keyed by uid.
    tags: HashMap<String, Vec<u8>>,
    /// Card currently in the field, keyed by reader name.
    present: HashMap<String, String>,
    events: Option<mpsc::UnboundedSender<ReaderEvent>>,
    /// Events raised before `start()`; flushed into the stream on start.
    backlog: Vec<ReaderEvent>,
    failures: Failures,
    gate: Option<IoGate>,
    reads: usize,
    writes: usize,
}

impl MockState {
    fn emit(&mut self, event: ReaderEvent) {
        match &self.events {
            // A closed stream means the bridge has stopped; nothing to deliver to.
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => self.backlog.push(event),
        }
    }

    fn card_on(&self, reader: &str) -> Result<String, HardwareError> {
        if !self.readers.iter().any(|r| r == reader) {
            return Err(HardwareError::ReaderUnavailable(reader.to_string()));
        }
        self.present
            .get(reader)
            .cloned()
            .ok_or(HardwareError::CardRemoved)
    }
}

/// A mock implementation of [`ReaderAdapter`] backed by in-memory tags.
#[derive(Clone, Default)]
pub struct MockReader {
    state: Arc<Mutex<MockState>>,
}

impl MockReader {
    /// Creates a mock with no readers attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock whose readers are already attached at start-up.
    pub fn with_readers<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        mock.lock().readers = names.into_iter().map(Into::into).collect();
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Hardware simulation ───────────────────────────────────────────────────

    /// Plugs in a reader.
    pub fn attach_reader(&self, name: impl Into<String>) {
        let name = name.into();
        let mut state = self.lock();
        if !state.readers.contains(&name) {
            state.readers.push(name.clone());
        }
        state.emit(ReaderEvent::ReaderAttached(name));
    }

    /// Unplugs a reader.  A card on it silently leaves the field.
    pub fn detach_reader(&self, name: &str) {
        let mut state = self.lock();
        state.readers.retain(|r| r != name);
        state.present.remove(name);
        state.emit(ReaderEvent::ReaderDetached(name.to_string()));
    }

    /// Registers a tag with explicit memory contents.
    pub fn insert_tag(&self, uid: impl Into<String>, memory: Vec<u8>) {
        self.lock().tags.insert(uid.into(), memory);
    }

    /// Registers a tag whose user area already holds `text`.
    ///
    /// # Errors
    ///
    /// Returns the codec's [`FormatError`] if `text` does not fit.
    pub fn insert_tag_with_text(
        &self,
        uid: impl Into<String>,
        codec: &TagCodec,
        text: &str,
    ) -> Result<(), FormatError> {
        let frame = codec.encode(text)?;
        let layout = codec.layout();
        let offset = layout.start_block as usize * layout.block_size;
        let mut memory = vec![0u8; DEFAULT_TAG_BYTES.max(offset + layout.capacity)];
        memory[offset..offset + frame.len()].copy_from_slice(&frame);
        self.insert_tag(uid, memory);
        Ok(())
    }

    /// Brings the tag `uid` into the field of `reader`.  Unknown uids get a
    /// blank tag.
    pub fn tap(&self, reader: &str, uid: &str) {
        let mut state = self.lock();
        state
            .tags
            .entry(uid.to_string())
            .or_insert_with(|| vec![0u8; DEFAULT_TAG_BYTES]);
        state.present.insert(reader.to_string(), uid.to_string());
        state.emit(ReaderEvent::CardDetected {
            reader: reader.to_string(),
            uid: uid.to_string(),
        });
    }

    /// Takes the card on `reader` out of the field.
    pub fn remove(&self, reader: &str) {
        let mut state = self.lock();
        if let Some(uid) = state.present.remove(reader) {
            state.emit(ReaderEvent::CardRemoved {
                reader: reader.to_string(),
                uid,
            });
        }
    }

    /// Raises a monitor-level fault on the event stream.
    pub fn emit_fault(&self, error: HardwareError) {
        self.lock().emit(ReaderEvent::Fault(error));
    }

    // ── Failure injection ─────────────────────────────────────────────────────

    pub fn fail_next_start(&self, error: HardwareError) {
        self.lock().failures.start = Some(error);
    }

    pub fn fail_next_list(&self, error: HardwareError) {
        self.lock().failures.list = Some(error);
    }

    pub fn fail_next_read(&self, error: HardwareError) {
        self.lock().failures.read = Some(error);
    }

    pub fn fail_next_write(&self, error: HardwareError) {
        self.lock().failures.write = Some(error);
    }

    /// Parks every subsequent block I/O call until released through the
    /// returned gate.
    pub fn hold_io(&self) -> IoGate {
        let gate = IoGate::new();
        self.lock().gate = Some(gate.clone());
        gate
    }

    /// Removes the gate and lets every parked call through.
    pub fn open_io(&self) {
        if let Some(gate) = self.lock().gate.take() {
            gate.permits.close();
        }
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    pub fn tag_memory(&self, uid: &str) -> Option<Vec<u8>> {
        self.lock().tags.get(uid).cloned()
    }

    /// Decodes the text currently stored on the tag `uid`.
    pub fn stored_text(&self, uid: &str, codec: &TagCodec) -> Option<Result<String, FormatError>> {
        let memory = self.tag_memory(uid)?;
        let layout = codec.layout();
        let offset = layout.start_block as usize * layout.block_size;
        let end = (offset + layout.capacity).min(memory.len());
        Some(codec.decode(memory.get(offset..end).unwrap_or_default()))
    }

    /// Number of `read_blocks` calls made so far.
    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    /// Number of `write_blocks` calls made so far.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    async fn pass_gate(&self) {
        let gate = self.lock().gate.clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
    }
}

#[async_trait]
impl ReaderAdapter for MockReader {
    async fn start(&self) -> Result<mpsc::UnboundedReceiver<ReaderEvent>, HardwareError> {
        let mut state = self.lock();
        if let Some(error) = state.failures.start.take() {
            return Err(error);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for event in state.backlog.drain(..) {
            let _ = tx.send(event);
        }
        state.events = Some(tx);
        Ok(rx)
    }

    async fn list_readers(&self) -> Result<Vec<String>, HardwareError> {
        let mut state = self.lock();
        if let Some(error) = state.failures.list.take() {
            return Err(error);
        }
        Ok(state.readers.clone())
    }

    async fn read_blocks(
        &self,
        reader: &str,
        block: u8,
        length: usize,
        block_size: usize,
    ) -> Result<Vec<u8>, HardwareError> {
        self.pass_gate().await;

        let mut state = self.lock();
        state.reads += 1;
        if let Some(error) = state.failures.read.take() {
            return Err(error);
        }
        let uid = state.card_on(reader)?;
        let memory = state.tags.get(&uid).ok_or(HardwareError::CardRemoved)?;

        let offset = block as usize * block_size;
        memory
            .get(offset..offset + length)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                HardwareError::Io(format!(
                    "read of {length} bytes at block {block} is outside tag memory"
                ))
            })
    }

    async fn write_blocks(
        &self,
        reader: &str,
        block: u8,
        data: &[u8],
        block_size: usize,
    ) -> Result<(), HardwareError> {
        self.pass_gate().await;

        let mut state = self.lock();
        state.writes += 1;
        if let Some(error) = state.failures.write.take() {
            return Err(error);
        }
        if block_size == 0 || data.len() % block_size != 0 {
            return Err(HardwareError::Io(format!(
                "write of {} bytes is not a whole number of {block_size}-byte blocks",
                data.len()
            )));
        }
        let uid = state.card_on(reader)?;
        let memory = state.tags.get_mut(&uid).ok_or(HardwareError::CardRemoved)?;

        let offset = block as usize * block_size;
        let target = memory.get_mut(offset..offset + data.len()).ok_or_else(|| {
            HardwareError::Io(format!(
                "write of {} bytes at block {block} is outside tag memory",
                data.len()
            ))
        })?;
        target.copy_from_slice(data);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const READER: &str = "Mock Reader 0";

    #[tokio::test]
    async fn test_events_raised_before_start_are_delivered_on_start() {
        // Arrange
        let mock = MockReader::new();
        mock.attach_reader(READER);
        mock.tap(READER, "04A1");

        // Act
        let mut rx = mock.start().await.expect("start should succeed");

        // Assert
        assert_eq!(rx.recv().await, Some(ReaderEvent::ReaderAttached(READER.into())));
        assert_eq!(
            rx.recv().await,
            Some(ReaderEvent::CardDetected {
                reader: READER.into(),
                uid: "04A1".into()
            })
        );
    }

    #[tokio::test]
    async fn test_write_then_read_blocks_round_trip() {
        // Arrange
        let mock = MockReader::with_readers([READER]);
        let _rx = mock.start().await.unwrap();
        mock.tap(READER, "04A1");

        // Act
        mock.write_blocks(READER, 4, &[1, 2, 3, 4, 5, 6, 7, 8], 4)
            .await
            .unwrap();
        let bytes = mock.read_blocks(READER, 5, 4, 4).await.unwrap();

        // Assert
        assert_eq!(bytes, vec![5, 6, 7, 8]);
        assert_eq!(mock.write_count(), 1);
        assert_eq!(mock.read_count(), 1);
    }

    #[tokio::test]
    async fn test_read_without_card_reports_card_removed() {
        let mock = MockReader::with_readers([READER]);
        let result = mock.read_blocks(READER, 4, 4, 4).await;
        assert_eq!(result, Err(HardwareError::CardRemoved));
    }

    #[tokio::test]
    async fn test_read_on_unknown_reader_reports_unavailable() {
        let mock = MockReader::new();
        let result = mock.read_blocks("ghost", 4, 4, 4).await;
        assert!(matches!(result, Err(HardwareError::ReaderUnavailable(_))));
    }

    #[tokio::test]
    async fn test_read_past_end_of_memory_is_io_error() {
        let mock = MockReader::with_readers([READER]);
        mock.tap(READER, "04A1");
        let result = mock.read_blocks(READER, 44, 8, 4).await;
        assert!(matches!(result, Err(HardwareError::Io(_))));
    }

    #[tokio::test]
    async fn test_injected_failure_applies_once() {
        // Arrange
        let mock = MockReader::with_readers([READER]);
        mock.tap(READER, "04A1");
        mock.fail_next_read(HardwareError::Timeout);

        // Act
        let first = mock.read_blocks(READER, 4, 4, 4).await;
        let second = mock.read_blocks(READER, 4, 4, 4).await;

        // Assert
        assert_eq!(first, Err(HardwareError::Timeout));
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_detach_reader_removes_present_card() {
        // Arrange
        let mock = MockReader::with_readers([READER]);
        let mut rx = mock.start().await.unwrap();
        mock.tap(READER, "04A1");

        // Act
        mock.detach_reader(READER);

        // Assert
        assert!(matches!(rx.recv().await, Some(ReaderEvent::CardDetected { .. })));
        assert_eq!(rx.recv().await, Some(ReaderEvent::ReaderDetached(READER.into())));
        assert!(mock.list_readers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_tag_with_text_is_readable_through_codec() {
        let codec = TagCodec::default();
        let mock = MockReader::new();
        mock.insert_tag_with_text("01", &codec, "artwork-1").unwrap();
        assert_eq!(mock.stored_text("01", &codec), Some(Ok("artwork-1".to_string())));
    }

    #[tokio::test]
    async fn test_io_gate_holds_call_until_released() {
        // Arrange
        let mock = MockReader::with_readers([READER]);
        mock.tap(READER, "04A1");
        let gate = mock.hold_io();
        let task = {
            let mock = mock.clone();
            tokio::spawn(async move { mock.write_blocks(READER, 4, &[9, 9, 9, 9], 4).await })
        };

        // Act
        gate.wait_entered().await;
        assert_eq!(mock.write_count(), 0, "write must still be parked");
        gate.release(1);

        // Assert
        assert_eq!(task.await.unwrap(), Ok(()));
        assert_eq!(mock.write_count(), 1);
    }
}
