//! Static weapon table shared by both peers.
//!
//! Damage values are what the shooter's side puts in `HIT` packets; magazine
//! sizes drive the ammo refill on every round reset.

use std::time::Duration;

use crate::protocol::WeaponKind;

/// Fixed characteristics of one weapon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeaponStats {
    pub name: &'static str,
    pub damage: u32,
    pub fire_interval: Duration,
    pub magazine: u32,
    pub range: f32,
    /// Tracer colour drawn by the shooter.
    pub color: &'static str,
    pub recoil: f32,
}

const RIFLE: WeaponStats = WeaponStats {
    name: "ASSAULT RIFLE",
    damage: 15,
    fire_interval: Duration::from_millis(100),
    magazine: 30,
    range: 100.0,
    color: "#3b82f6",
    recoil: 0.05,
};

const PISTOL: WeaponStats = WeaponStats {
    name: "TACTICAL PISTOL",
    damage: 25,
    fire_interval: Duration::from_millis(250),
    magazine: 12,
    range: 50.0,
    color: "#eab308",
    recoil: 0.1,
};

const KNIFE: WeaponStats = WeaponStats {
    name: "COMBAT KNIFE",
    damage: 50,
    fire_interval: Duration::from_millis(500),
    magazine: 1,
    range: 3.0,
    color: "#ef4444",
    recoil: 0.0,
};

const SNIPER: WeaponStats = WeaponStats {
    name: "AWP SNIPER",
    damage: 100,
    fire_interval: Duration::from_millis(1500),
    magazine: 5,
    range: 200.0,
    color: "#a855f7",
    recoil: 0.5,
};

impl WeaponKind {
    /// All weapon kinds in loadout order.
    pub const ALL: [WeaponKind; 4] = [Self::Rifle, Self::Pistol, Self::Knife, Self::Sniper];

    /// Static stats for this weapon.
    pub fn stats(self) -> &'static WeaponStats {
        match self {
            Self::Rifle => &RIFLE,
            Self::Pistol => &PISTOL,
            Self::Knife => &KNIFE,
            Self::Sniper => &SNIPER,
        }
    }

    /// Display name shown in the kill feed.
    pub fn display_name(self) -> &'static str {
        self.stats().name
    }
}

/// Per-weapon rounds remaining for the local player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ammo {
    rounds: [u32; 4],
}

impl Ammo {
    /// A full loadout.
    pub fn full() -> Self {
        Self {
            rounds: WeaponKind::ALL.map(|w| w.stats().magazine),
        }
    }

    /// Rounds left for `weapon`.
    pub fn remaining(&self, weapon: WeaponKind) -> u32 {
        self.rounds.get(slot(weapon)).copied().unwrap_or(0)
    }

    /// Spend one round. Returns `false` if the magazine was already empty.
    pub fn spend(&mut self, weapon: WeaponKind) -> bool {
        match self.rounds.get_mut(slot(weapon)) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }

    /// Refill `weapon` to its magazine size. Returns the new count.
    pub fn reload(&mut self, weapon: WeaponKind) -> u32 {
        let full = weapon.stats().magazine;
        if let Some(left) = self.rounds.get_mut(slot(weapon)) {
            *left = full;
        }
        full
    }
}

impl Default for Ammo {
    fn default() -> Self {
        Self::full()
    }
}

fn slot(weapon: WeaponKind) -> usize {
    match weapon {
        WeaponKind::Rifle => 0,
        WeaponKind::Pistol => 1,
        WeaponKind::Knife => 2,
        WeaponKind::Sniper => 3,
    }
}
