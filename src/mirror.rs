//! Cache of the opponent's latest movement snapshot.

use crate::protocol::PlayerSnapshot;

/// Last-received [`PlayerSnapshot`] of the remote player.
///
/// Overwritten wholesale on each `PLAYER_UPDATE`; otherwise read-only.
#[derive(Debug, Clone, Default)]
pub struct RemoteMirror {
    latest: Option<PlayerSnapshot>,
    updates: u64,
}

impl RemoteMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot with one just received.
    pub fn overwrite(&mut self, snapshot: PlayerSnapshot) {
        self.latest = Some(snapshot);
        self.updates += 1;
    }

    /// The most recent snapshot, if any has arrived.
    pub fn latest(&self) -> Option<&PlayerSnapshot> {
        self.latest.as_ref()
    }

    /// Number of snapshots received since the last clear.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Forget the opponent (disconnect).
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::{Vec3, WeaponKind};

    fn at(x: f32) -> PlayerSnapshot {
        PlayerSnapshot {
            position: Vec3::new(x, 0.0, 0.0),
            ..PlayerSnapshot::default()
        }
    }

    #[test]
    fn overwrite_replaces_everything() {
        let mut mirror = RemoteMirror::new();
        mirror.overwrite(PlayerSnapshot {
            is_firing: true,
            current_weapon: WeaponKind::Knife,
            ..at(1.0)
        });
        mirror.overwrite(at(2.0));

        let latest = mirror.latest().unwrap();
        assert_eq!(latest.position.x, 2.0);
        assert!(!latest.is_firing);
        assert_eq!(latest.current_weapon, WeaponKind::Rifle);
        assert_eq!(mirror.updates(), 2);
    }

    #[test]
    fn clear_forgets_opponent() {
        let mut mirror = RemoteMirror::new();
        mirror.overwrite(at(3.0));
        mirror.clear();
        assert!(mirror.latest().is_none());
        assert_eq!(mirror.updates(), 0);
    }
}
