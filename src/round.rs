//! Round and match scoring state machine.
//!
//! ```text
//! Lobby ──start──▶ Playing ──record_round──▶ RoundOver ──begin_next_round──▶ Playing
//!                                              │
//!                                              └─(counter hits threshold)──▶ MatchOver
//! ```
//!
//! Every side runs its own machine. A round is recorded at most once, so the
//! redundant KILL and ROUND_END signals for the same elimination collapse into
//! one transition. Only [`RoundMachine::reset`] leaves `MatchOver` or lowers a
//! counter.

use crate::protocol::Role;

/// Default number of round wins that ends a match (first to three).
pub const DEFAULT_ROUNDS_TO_WIN: u32 = 3;

/// One side of the duel, seen from the local process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Local,
    Remote,
}

impl Side {
    pub fn opponent(self) -> Self {
        match self {
            Self::Local => Self::Remote,
            Self::Remote => Self::Local,
        }
    }

    /// The [`Role`] this side holds, given the local role.
    pub fn role(self, local: Role) -> Role {
        match self {
            Self::Local => local,
            Self::Remote => local.opponent(),
        }
    }

    /// Translate a role named on the wire into a side.
    pub fn of_role(role: Role, local: Role) -> Self {
        if role == local {
            Self::Local
        } else {
            Self::Remote
        }
    }
}

/// Phase of the match on this side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPhase {
    #[default]
    Lobby,
    Playing,
    /// Transient: the round is decided and the next one has not begun.
    RoundOver,
    /// Terminal until a full reset.
    MatchOver,
}

/// Round counters and winners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundState {
    pub local_rounds_won: u32,
    pub remote_rounds_won: u32,
    pub last_round_winner: Option<Side>,
    pub match_winner: Option<Side>,
}

impl RoundState {
    pub fn rounds_won(&self, side: Side) -> u32 {
        match side {
            Side::Local => self.local_rounds_won,
            Side::Remote => self.remote_rounds_won,
        }
    }

    /// Rounds played to a decision in this match.
    pub fn rounds_played(&self) -> u32 {
        self.local_rounds_won + self.remote_rounds_won
    }
}

/// Result of recording a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundOutcome {
    pub winner: Side,
    pub score: RoundState,
    /// The winner just reached the threshold; the match is over.
    pub match_over: bool,
}

/// Per-side round/match state machine.
#[derive(Debug, Clone)]
pub struct RoundMachine {
    phase: MatchPhase,
    score: RoundState,
    rounds_to_win: u32,
    round: u32,
}

impl RoundMachine {
    /// A machine in the lobby. `rounds_to_win` is clamped to at least 1.
    pub fn new(rounds_to_win: u32) -> Self {
        Self {
            phase: MatchPhase::Lobby,
            score: RoundState::default(),
            rounds_to_win: rounds_to_win.max(1),
            round: 0,
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn score(&self) -> RoundState {
        self.score
    }

    /// 1-based number of the current round; 0 in the lobby.
    pub fn round_number(&self) -> u32 {
        self.round
    }

    pub fn rounds_to_win(&self) -> u32 {
        self.rounds_to_win
    }

    pub fn is_playing(&self) -> bool {
        self.phase == MatchPhase::Playing
    }

    /// Enter the first round. Only valid from the lobby; readiness is not
    /// consulted. Returns `false` if the match was already under way.
    pub fn start(&mut self) -> bool {
        if self.phase != MatchPhase::Lobby {
            return false;
        }
        self.phase = MatchPhase::Playing;
        self.round = 1;
        true
    }

    /// Record the current round's winner.
    ///
    /// Returns `None` when the round was already recorded, no round is in
    /// play, or the match is over; the score is left untouched in all three.
    pub fn record_round(&mut self, winner: Side) -> Option<RoundOutcome> {
        if self.phase != MatchPhase::Playing || self.score.match_winner.is_some() {
            return None;
        }

        match winner {
            Side::Local => self.score.local_rounds_won += 1,
            Side::Remote => self.score.remote_rounds_won += 1,
        }
        self.score.last_round_winner = Some(winner);

        let match_over = self.score.rounds_won(winner) >= self.rounds_to_win;
        if match_over {
            self.score.match_winner = Some(winner);
            self.phase = MatchPhase::MatchOver;
        } else {
            self.phase = MatchPhase::RoundOver;
        }

        Some(RoundOutcome {
            winner,
            score: self.score,
            match_over,
        })
    }

    /// Leave `RoundOver` for a fresh round. Returns `false` from any other phase.
    pub fn begin_next_round(&mut self) -> bool {
        if self.phase != MatchPhase::RoundOver {
            return false;
        }
        self.phase = MatchPhase::Playing;
        self.score.last_round_winner = None;
        self.round += 1;
        true
    }

    /// Full reset back to the lobby with all counters cleared.
    pub fn reset(&mut self) {
        self.phase = MatchPhase::Lobby;
        self.score = RoundState::default();
        self.round = 0;
    }
}

impl Default for RoundMachine {
    fn default() -> Self {
        Self::new(DEFAULT_ROUNDS_TO_WIN)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn playing_with(local: u32, remote: u32) -> RoundMachine {
        let mut machine = RoundMachine::default();
        machine.start();
        for _ in 0..local {
            machine.record_round(Side::Local).unwrap();
            machine.begin_next_round();
        }
        for _ in 0..remote {
            machine.record_round(Side::Remote).unwrap();
            machine.begin_next_round();
        }
        machine
    }

    #[test]
    fn start_only_from_lobby() {
        let mut machine = RoundMachine::default();
        assert!(machine.start());
        assert_eq!(machine.phase(), MatchPhase::Playing);
        assert_eq!(machine.round_number(), 1);
        assert!(!machine.start());
    }

    #[test]
    fn round_is_recorded_once() {
        let mut machine = playing_with(0, 0);
        assert!(machine.record_round(Side::Local).is_some());
        assert!(machine.record_round(Side::Local).is_none());
        assert_eq!(machine.score().local_rounds_won, 1);
    }

    #[test]
    fn losing_at_two_one_levels_the_score() {
        let mut machine = playing_with(2, 1);
        let outcome = machine.record_round(Side::Remote).unwrap();
        assert!(!outcome.match_over);
        assert_eq!(outcome.score.local_rounds_won, 2);
        assert_eq!(outcome.score.remote_rounds_won, 2);
        assert_eq!(outcome.score.match_winner, None);
        assert_eq!(machine.phase(), MatchPhase::RoundOver);

        assert!(machine.begin_next_round());
        assert_eq!(machine.score().last_round_winner, None);
    }

    #[test]
    fn third_win_ends_the_match() {
        let mut machine = playing_with(2, 2);
        let outcome = machine.record_round(Side::Local).unwrap();
        assert!(outcome.match_over);
        assert_eq!(outcome.score.match_winner, Some(Side::Local));
        assert_eq!(machine.phase(), MatchPhase::MatchOver);

        assert!(!machine.begin_next_round());
        assert!(machine.record_round(Side::Remote).is_none());
        assert_eq!(machine.score().remote_rounds_won, 2);
    }

    #[test]
    fn counters_never_decrease_until_reset() {
        let mut machine = RoundMachine::default();
        machine.start();
        let mut last = 0;
        for winner in [Side::Local, Side::Remote, Side::Remote, Side::Local, Side::Local] {
            machine.record_round(winner);
            machine.begin_next_round();
            let played = machine.score().rounds_played();
            assert!(played >= last);
            last = played;
        }
        machine.reset();
        assert_eq!(machine.score(), RoundState::default());
        assert_eq!(machine.phase(), MatchPhase::Lobby);
    }

    #[test]
    fn record_outside_play_is_ignored() {
        let mut machine = RoundMachine::default();
        assert!(machine.record_round(Side::Local).is_none());
        assert_eq!(machine.score().rounds_played(), 0);
    }

    #[test]
    fn threshold_is_clamped() {
        let mut machine = RoundMachine::new(0);
        assert_eq!(machine.rounds_to_win(), 1);
        machine.start();
        assert!(machine.record_round(Side::Remote).unwrap().match_over);
    }

    #[test]
    fn side_role_translation() {
        assert_eq!(Side::Local.role(Role::Host), Role::Host);
        assert_eq!(Side::Remote.role(Role::Host), Role::Client);
        assert_eq!(Side::of_role(Role::Client, Role::Host), Side::Remote);
        assert_eq!(Side::of_role(Role::Client, Role::Client), Side::Local);
    }
}
