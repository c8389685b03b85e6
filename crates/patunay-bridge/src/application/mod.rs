//! Application layer for the NFC bridge.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure rules in `patunay-core`) and the infrastructure (reader drivers,
//! stdio, files).  Code here orchestrates domain objects to fulfil a user
//! goal ("write this artwork id onto the next tag that is tapped") and talks
//! to hardware only through the `ReaderAdapter` trait, so every use case can
//! be driven by the in-memory mock reader in tests.
//!
//! # Sub-modules
//!
//! - **`mode_controller`** – The Idle/Read/Write/Search state machine.  Pure
//!   state, no I/O: it only decides what a card tap should do.
//!
//! - **`device_status`** – Folds reader attach/detach into a `DeviceStatus`
//!   snapshot that can be read synchronously at any time.
//!
//! - **`card_operation`** – The actual tag reads and writes: block I/O through
//!   the adapter, framed by the tag codec.
//!
//! - **`event_hub`** – Publish/subscribe fan-out, one channel per outbound
//!   event category, with a disposer handle per subscription.
//!
//! - **`event_bridge`** – The single task that owns all of the above, accepts
//!   commands, and turns every outcome into an outbound event.

pub mod card_operation;
pub mod device_status;
pub mod event_bridge;
pub mod event_hub;
pub mod mode_controller;
