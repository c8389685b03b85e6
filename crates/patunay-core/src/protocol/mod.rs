//! Protocol module containing the JSON message types exchanged with the UI shell.

pub mod messages;

pub use messages::*;
