//! DeviceStatusTracker: folds reader attach/detach into a status snapshot.
//!
//! The tracker is owned by the bridge task.  Every mutation returns the new
//! [`DeviceStatus`] (which the bridge publishes as a `device-status` event)
//! and also pushes it into a `watch` channel, so handles can read the last
//! snapshot synchronously without a round-trip through the bridge.

use patunay_core::DeviceStatus;
use tokio::sync::watch;

pub struct DeviceStatusTracker {
    readers: Vec<String>,
    initialized: bool,
    tx: watch::Sender<DeviceStatus>,
}

impl Default for DeviceStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStatusTracker {
    /// Creates a tracker with no readers, not yet initialized.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(DeviceStatus::default());
        Self {
            readers: Vec::new(),
            initialized: false,
            tx,
        }
    }

    /// Returns a receiver that always holds the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<DeviceStatus> {
        self.tx.subscribe()
    }

    /// The current snapshot.  Never touches hardware.
    pub fn snapshot(&self) -> DeviceStatus {
        DeviceStatus::new(self.readers.clone(), self.initialized)
    }

    /// Records the first successful enumeration after the adapter started.
    pub fn initialize(&mut self, readers: Vec<String>) -> DeviceStatus {
        self.initialized = true;
        self.replace_readers(readers)
    }

    /// Adds `name`.  Attaching a known reader is idempotent but still
    /// produces a snapshot.
    pub fn reader_attached(&mut self, name: &str) -> DeviceStatus {
        if !self.readers.iter().any(|r| r == name) {
            self.readers.push(name.to_string());
        }
        self.publish()
    }

    /// Removes `name` if present and produces a snapshot.
    pub fn reader_detached(&mut self, name: &str) -> DeviceStatus {
        self.readers.retain(|r| r != name);
        self.publish()
    }

    /// Replaces the reader list wholesale (after a re-enumeration).
    pub fn replace_readers(&mut self, readers: Vec<String>) -> DeviceStatus {
        let mut deduped: Vec<String> = Vec::with_capacity(readers.len());
        for name in readers {
            if !deduped.contains(&name) {
                deduped.push(name);
            }
        }
        self.readers = deduped;
        self.publish()
    }

    /// The reader monitor went away.  Nothing is usable until it restarts,
    /// so the snapshot drops back to unavailable and uninitialized.
    pub fn monitor_stopped(&mut self) -> DeviceStatus {
        self.initialized = false;
        self.readers.clear();
        self.publish()
    }

    fn publish(&self) -> DeviceStatus {
        let status = self.snapshot();
        self.tx.send_replace(status.clone());
        status
    }
}
