//! Domain entities for the Patunay NFC bridge.
//!
//! Everything here is plain data plus the rules that keep it consistent:
//! which modes exist and what a valid mode change looks like, what a device
//! status snapshot means, and the shape of the records produced by card
//! operations.  No I/O, no async, no channels.

pub mod card;
pub mod mode;
pub mod outcome;
pub mod status;
