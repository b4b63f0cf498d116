//! Per-match statistics and the kill feed.

use std::collections::VecDeque;

use crate::protocol::WeaponKind;
use crate::round::Side;

/// Kill-feed entries kept for display.
pub const KILL_FEED_LEN: usize = 5;

/// Counters accumulated over one match; cleared on full reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchStats {
    pub shots_fired: u32,
    pub shots_hit: u32,
    pub kills: u32,
    pub deaths: u32,
    /// Weapon used for the most recent local shot.
    pub last_weapon: Option<WeaponKind>,
}

impl MatchStats {
    /// Hit ratio in `0.0..=1.0`; zero before the first shot.
    pub fn accuracy(&self) -> f32 {
        if self.shots_fired == 0 {
            0.0
        } else {
            (self.shots_hit as f32 / self.shots_fired as f32).min(1.0)
        }
    }
}

/// One line of the kill feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillFeedEntry {
    pub killer: Side,
    pub victim: Side,
    pub weapon: WeaponKind,
}

/// Most recent eliminations, oldest first.
#[derive(Debug, Clone, Default)]
pub struct KillFeed {
    entries: VecDeque<KillFeedEntry>,
}

impl KillFeed {
    /// Append an entry, evicting the oldest beyond [`KILL_FEED_LEN`].
    pub fn push(&mut self, entry: KillFeedEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > KILL_FEED_LEN {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &KillFeedEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_handles_no_shots() {
        let mut stats = MatchStats::default();
        assert_eq!(stats.accuracy(), 0.0);
        stats.shots_fired = 4;
        stats.shots_hit = 1;
        assert!((stats.accuracy() - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn kill_feed_keeps_last_five() {
        let mut feed = KillFeed::default();
        for i in 0..7 {
            let killer = if i % 2 == 0 { Side::Local } else { Side::Remote };
            feed.push(KillFeedEntry {
                killer,
                victim: killer.opponent(),
                weapon: WeaponKind::Rifle,
            });
        }
        assert_eq!(feed.len(), KILL_FEED_LEN);
        // Entries 0 and 1 were evicted; entry 2 (local kill) is now first.
        assert_eq!(feed.entries().next().unwrap().killer, Side::Local);
    }
}
