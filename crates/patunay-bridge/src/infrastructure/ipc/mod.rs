//! Process boundary between the bridge and the UI shell.
//!
//! The UI shell spawns the bridge and talks to it over the child's stdin and
//! stdout, one JSON object per line.  Logs go to stderr so they never mix
//! with protocol traffic.

pub mod session;

use std::future::Future;

pub use session::{serve, IpcSession};

use crate::application::event_bridge::BridgeHandle;

/// Serves the UI shell on this process's stdin and stdout.
///
/// Subscribes immediately; see [`serve`].
pub fn serve_stdio(handle: BridgeHandle) -> impl Future<Output = anyhow::Result<()>> {
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    serve(handle, input, tokio::io::stdout())
}
