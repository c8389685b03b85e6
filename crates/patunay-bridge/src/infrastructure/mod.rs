//! Infrastructure layer for the NFC bridge.
//!
//! Contains OS-facing adapters: card-reader backends, the stdio transport to
//! the UI shell, and file-system storage for the configuration.
//!
//! **Dependency rule**: the `application` layer only sees the
//! [`reader::ReaderAdapter`] trait and the event types declared next to it,
//! never a concrete backend.

pub mod ipc;
pub mod reader;
pub mod storage;
