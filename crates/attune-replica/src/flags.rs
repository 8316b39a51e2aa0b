//! Controller-driven fault state.
//!
//! Written only by the control-channel reader, read by the broadcast and
//! inbound threads. Per-field atomics are enough: frames on a single TCP
//! stream arrive in order, and readers only need a consistent view of
//! each flag, not of the triple.

use std::sync::atomic::{AtomicBool, Ordering};

use attune_wire::ControlFrame;

/// A replica's current fault flags.
#[derive(Debug, Default)]
pub struct FaultFlags {
    is_down: AtomicBool,
    is_byzantine: AtomicBool,
    is_done: AtomicBool,
}

impl FaultFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one control frame.
    ///
    /// `is_down` and `is_byzantine` are overridden; `is_done` is one-way
    /// and survives any later frame.
    pub fn apply(&self, frame: &ControlFrame) {
        self.is_down.store(frame.is_down, Ordering::SeqCst);
        self.is_byzantine.store(frame.is_byzantine, Ordering::SeqCst);
        if frame.is_done {
            self.is_done.store(true, Ordering::SeqCst);
        }
    }

    /// Marks the replica permanently done (used when the control stream
    /// itself fails).
    pub fn mark_done(&self) {
        self.is_done.store(true, Ordering::SeqCst);
    }

    /// Whether protocol I/O is currently suppressed.
    pub fn is_down(&self) -> bool {
        self.is_down.load(Ordering::SeqCst)
    }

    /// Whether broadcasts must be corrupted.
    pub fn is_byzantine(&self) -> bool {
        self.is_byzantine.load(Ordering::SeqCst)
    }

    /// Whether the permanent shutdown request has been observed.
    pub fn is_done(&self) -> bool {
        self.is_done.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_override_down_and_byzantine() {
        let flags = FaultFlags::new();
        flags.apply(&ControlFrame {
            is_down: true,
            is_byzantine: true,
            is_done: false,
        });
        assert!(flags.is_down());
        assert!(flags.is_byzantine());

        flags.apply(&ControlFrame::startup());
        assert!(!flags.is_down());
        assert!(!flags.is_byzantine());
    }

    #[test]
    fn done_is_one_way() {
        let flags = FaultFlags::new();
        flags.apply(&ControlFrame::shutdown());
        assert!(flags.is_done());

        // A later (reordered or stale) frame cannot revive the replica.
        flags.apply(&ControlFrame::startup());
        assert!(flags.is_done());
    }

    #[test]
    fn mark_done_matches_a_shutdown_frame() {
        let flags = FaultFlags::new();
        flags.mark_done();
        assert!(flags.is_done());
        assert!(!flags.is_down());
    }
}
