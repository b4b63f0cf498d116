//! Local health, ammo and the death-latch.
//!
//! Damage authority sits with the victim: this side only ever lowers its own
//! health, in response to an inbound `HIT` (or a local bot's damage). The
//! latch closes the moment health reaches zero and stays closed until the
//! next round reset, so near-simultaneous `HIT`s cannot produce a second
//! elimination.
//!
//! The shooter's side decides whether a shot connects and nothing here
//! checks that claim. A modified client can send arbitrary `HIT`s; with no
//! server in the loop this is an accepted cheating vector.

use crate::protocol::WeaponKind;
use crate::weapons::Ammo;

/// Health at the start of every round.
pub const MAX_HEALTH: u32 = 100;

/// What applying a hit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    /// The latch was already closed; nothing changed.
    Ignored,
    /// Health dropped but stayed above zero.
    Wounded { health: u32 },
    /// Health reached zero and the latch closed.
    Eliminated { killed_by: WeaponKind },
}

/// Round-scoped state of the local player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vitals {
    health: u32,
    death_latched: bool,
    ammo: Ammo,
}

impl Vitals {
    pub fn new() -> Self {
        Self {
            health: MAX_HEALTH,
            death_latched: false,
            ammo: Ammo::full(),
        }
    }

    pub fn health(&self) -> u32 {
        self.health
    }

    pub fn is_dead(&self) -> bool {
        self.death_latched
    }

    pub fn ammo(&self) -> &Ammo {
        &self.ammo
    }

    /// Apply `damage` from `weapon`, clamping at zero.
    pub fn apply_damage(&mut self, damage: u32, weapon: WeaponKind) -> DamageOutcome {
        if self.death_latched {
            return DamageOutcome::Ignored;
        }
        self.health = self.health.saturating_sub(damage);
        if self.health == 0 {
            self.death_latched = true;
            DamageOutcome::Eliminated { killed_by: weapon }
        } else {
            DamageOutcome::Wounded {
                health: self.health,
            }
        }
    }

    /// Spend one round of `weapon`. Returns `false` on an empty magazine.
    pub fn spend_round(&mut self, weapon: WeaponKind) -> bool {
        self.ammo.spend(weapon)
    }

    /// Refill the magazine of `weapon`. Returns the rounds now loaded.
    pub fn reload(&mut self, weapon: WeaponKind) -> u32 {
        self.ammo.reload(weapon)
    }

    /// Refill health and ammo and reopen the latch.
    pub fn reset_round(&mut self) {
        *self = Self::new();
    }
}

impl Default for Vitals {
    fn default() -> Self {
        Self::new()
    }
}
