//! ModeController: decides what a card tap does.
//!
//! The controller is a plain state machine owned by the bridge task.  It never
//! touches hardware; it hands back a [`CardAction`] for each detected card and
//! is told how a write ended so it can apply the single-shot rule.
//!
//! # Generations
//!
//! Every [`ModeController::set_mode`] bumps a generation counter.  A write
//! carries the generation it was started under, and a successful write only
//! reverts the mode to `Idle` if no newer `set_mode` arrived while the write
//! was in flight.  That keeps "last command wins" true across the await point
//! of the hardware call.

use patunay_core::{Mode, ModeRequest};
use tracing::debug;

/// What the bridge should do with a card that just entered the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardAction {
    /// No tag I/O; only announce presence.
    Announce,
    /// Read and decode the tag, report it as `card-detected` with data.
    Read,
    /// Encode and write `text`, report a `write-result`.
    Write { text: String, generation: u64 },
    /// Read and decode the tag, report a `card-search-result`.
    Search,
}

/// Owns the current mode and the pending write payload.
#[derive(Debug, Default)]
pub struct ModeController {
    mode: Mode,
    generation: u64,
}

impl ModeController {
    /// Creates a controller in `Idle`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    /// Replaces the current mode.
    ///
    /// The request was validated when it was built, so this cannot fail.
    /// Returns the new generation.
    pub fn set_mode(&mut self, request: ModeRequest) -> u64 {
        self.mode = request.into_mode();
        self.generation += 1;
        debug!(mode = %self.mode.kind(), generation = self.generation, "mode changed");
        self.generation
    }

    /// Decides the action for a newly detected card.  Does not change state.
    pub fn action_for_card(&self) -> CardAction {
        match &self.mode {
            Mode::Idle => CardAction::Announce,
            Mode::Read => CardAction::Read,
            Mode::Write { text } => CardAction::Write {
                text: text.clone(),
                generation: self.generation,
            },
            Mode::Search => CardAction::Search,
        }
    }

    /// Records the end of a write started under `generation`.
    ///
    /// A successful write reverts to `Idle` unless the mode was changed while
    /// it was in flight.  A failed write leaves the mode armed so the next tap
    /// retries.  Returns `true` when the mode changed.
    pub fn complete_write(&mut self, generation: u64, success: bool) -> bool {
        if !success || generation != self.generation {
            return false;
        }
        self.mode = Mode::Idle;
        self.generation += 1;
        debug!(generation = self.generation, "single-shot write complete, back to idle");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patunay_core::ModeKind;

    fn write(text: &str) -> ModeRequest {
        ModeRequest::write(text).expect("non-empty text is valid")
    }

    #[test]
    fn test_initial_mode_is_idle() {
        let controller = ModeController::new();
        assert_eq!(controller.mode(), &Mode::Idle);
        assert_eq!(controller.action_for_card(), CardAction::Announce);
    }

    #[test]
    fn test_write_mode_produces_write_action_with_payload() {
        // Arrange
        let mut controller = ModeController::new();

        // Act
        let generation = controller.set_mode(write("hello"));

        // Assert
        assert_eq!(
            controller.action_for_card(),
            CardAction::Write {
                text: "hello".to_string(),
                generation
            }
        );
    }

    #[test]
    fn test_later_set_mode_replaces_pending_write() {
        // Arrange
        let mut controller = ModeController::new();
        controller.set_mode(write("x"));

        // Act
        controller.set_mode(ModeRequest::read());

        // Assert
        assert_eq!(controller.mode().kind(), ModeKind::Read);
        assert_eq!(controller.mode().write_text(), None);
        assert_eq!(controller.action_for_card(), CardAction::Read);
    }

    #[test]
    fn test_successful_write_reverts_to_idle() {
        // Arrange
        let mut controller = ModeController::new();
        let generation = controller.set_mode(write("hello"));

        // Act
        let changed = controller.complete_write(generation, true);

        // Assert
        assert!(changed);
        assert_eq!(controller.mode(), &Mode::Idle);
        assert_eq!(controller.action_for_card(), CardAction::Announce);
    }

    #[test]
    fn test_failed_write_stays_armed() {
        let mut controller = ModeController::new();
        let generation = controller.set_mode(write("hello"));

        let changed = controller.complete_write(generation, false);

        assert!(!changed);
        assert_eq!(controller.mode().write_text(), Some("hello"));
    }

    #[test]
    fn test_stale_write_completion_does_not_override_newer_mode() {
        // Arrange: a write is in flight when the UI switches to Search
        let mut controller = ModeController::new();
        let stale = controller.set_mode(write("hello"));
        controller.set_mode(ModeRequest::search());

        // Act
        let changed = controller.complete_write(stale, true);

        // Assert
        assert!(!changed);
        assert_eq!(controller.mode(), &Mode::Search);
    }

    #[test]
    fn test_search_mode_is_sticky_across_actions() {
        let mut controller = ModeController::new();
        controller.set_mode(ModeRequest::search());
        assert_eq!(controller.action_for_card(), CardAction::Search);
        assert_eq!(controller.action_for_card(), CardAction::Search);
    }

    #[test]
    fn test_generation_increases_on_every_set_mode() {
        let mut controller = ModeController::new();
        let first = controller.set_mode(ModeRequest::read());
        let second = controller.set_mode(ModeRequest::read());
        assert!(second > first);
    }
}
