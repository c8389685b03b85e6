//! Aggregated reader availability.

use serde::{Deserialize, Serialize};

/// Snapshot of the card-reader hardware as last observed by the bridge.
///
/// `available` is derived from `readers` on construction and cannot be set
/// on its own, so `available == !readers.is_empty()` holds for every value
/// of this type, including ones deserialized from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawDeviceStatus")]
pub struct DeviceStatus {
    available: bool,
    readers: Vec<String>,
    initialized: bool,
}

/// Wire shape used only to funnel deserialization through [`DeviceStatus::new`].
#[derive(Deserialize)]
struct RawDeviceStatus {
    #[serde(default)]
    readers: Vec<String>,
    #[serde(default)]
    initialized: bool,
}

impl From<RawDeviceStatus> for DeviceStatus {
    fn from(raw: RawDeviceStatus) -> Self {
        DeviceStatus::new(raw.readers, raw.initialized)
    }
}

impl DeviceStatus {
    /// Builds a snapshot from the attached reader names.
    pub fn new(readers: Vec<String>, initialized: bool) -> Self {
        Self {
            available: !readers.is_empty(),
            readers,
            initialized,
        }
    }

    /// `true` when at least one reader is attached.
    pub fn available(&self) -> bool {
        self.available
    }

    /// Names of the attached readers, in attach order.
    pub fn readers(&self) -> &[String] {
        &self.readers
    }

    /// `true` once the reader service has started monitoring hardware.
    pub fn initialized(&self) -> bool {
        self.initialized
    }
}
