//! Lobby ready-check.
//!
//! Readiness is advisory: it feeds the UI's "launch" affordance but never
//! gates `START`. Only the host's explicit launch begins a match.

/// Local and remote readiness flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadyCheck {
    local: bool,
    remote: bool,
}

impl ReadyCheck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a local toggle. Returns `true` if the flag changed.
    pub fn set_local(&mut self, ready: bool) -> bool {
        let changed = self.local != ready;
        self.local = ready;
        changed
    }

    /// Record an inbound `READY`. Always overwrites: the most recent packet wins.
    pub fn set_remote(&mut self, ready: bool) {
        self.remote = ready;
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn remote(&self) -> bool {
        self.remote
    }

    /// Both sides have signalled readiness.
    pub fn both_ready(&self) -> bool {
        self.local && self.remote
    }

    /// Clear both flags (lobby entry, full reset).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
