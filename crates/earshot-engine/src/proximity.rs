//! Proximity engine: who can hear whom, and how loudly.

use std::sync::Arc;

use earshot_core::protocol::NearbyEntry;
use earshot_core::volume::volume_at;
use earshot_core::{PlayerId, Vec3, WorldId};

use crate::store::PositionStore;

pub struct ProximityEngine {
    store: Arc<PositionStore>,
    attenuation: f64,
}

impl ProximityEngine {
    pub fn new(store: Arc<PositionStore>, attenuation: f64) -> Self {
        Self { store, attenuation }
    }

    pub fn attenuation(&self) -> f64 {
        self.attenuation
    }

    /// Resolve a player's position, preferring the latest ingest snapshot
    /// and falling back to the caller-supplied cached position (typically
    /// the connection registry's). `None` means "not yet located".
    pub fn resolve(
        &self,
        id: &PlayerId,
        fallback: Option<(Vec3, WorldId)>,
    ) -> Option<(Vec3, WorldId)> {
        if let Some(p) = self.store.get(id) {
            return Some((p.pos, p.world));
        }
        fallback
    }

    /// All other same-world players within `radius` of the subject, each
    /// with a distance-derived volume. Returns empty when the subject has no
    /// resolvable position — that is "not yet located", not an error.
    ///
    /// O(N) over the stored snapshot; ordering is unspecified.
    pub fn compute_nearby(
        &self,
        subject: &PlayerId,
        fallback: Option<(Vec3, WorldId)>,
        radius: f64,
    ) -> Vec<NearbyEntry> {
        let Some((origin, world)) = self.resolve(subject, fallback) else {
            return Vec::new();
        };

        let mut nearby = Vec::new();
        self.store.for_each(|id, p| {
            if id == subject || p.world != world {
                return;
            }
            let dist = origin.distance_to(&p.pos);
            if dist <= radius {
                nearby.push(NearbyEntry {
                    id: id.clone(),
                    username: p.username.clone(),
                    x: p.pos.x,
                    y: p.pos.y,
                    z: p.pos.z,
                    volume: volume_at(dist, self.attenuation),
                });
            }
        });
        nearby
    }

    /// Volume for a negotiation pairing. When either side is unresolved the
    /// distance falls back to `fallback_distance` rather than failing — the
    /// receiving side still needs a usable starting volume.
    pub fn pair_volume(&self, a: Option<Vec3>, b: Option<Vec3>, fallback_distance: f64) -> f64 {
        let dist = match (a, b) {
            (Some(a), Some(b)) => a.distance_to(&b),
            _ => fallback_distance,
        };
        volume_at(dist, self.attenuation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use earshot_core::volume::DEFAULT_ATTENUATION;
    use earshot_core::PlayerPosition;

    fn engine_with(entries: Vec<(&str, f64, f64, f64, &str)>) -> ProximityEngine {
        let store = Arc::new(PositionStore::new());
        store.replace_all(entries.into_iter().map(|(id, x, y, z, world)| {
            (
                PlayerId::from_raw(id),
                PlayerPosition {
                    pos: Vec3::new(x, y, z),
                    world: WorldId::from_raw(world),
                    username: id.to_uppercase(),
                },
            )
        }));
        ProximityEngine::new(store, DEFAULT_ATTENUATION)
    }

    #[test]
    fn two_players_ten_apart_hear_each_other() {
        let engine = engine_with(vec![
            ("p1", 0.0, 0.0, 0.0, "w"),
            ("p2", 10.0, 0.0, 0.0, "w"),
        ]);

        let nearby = engine.compute_nearby(&PlayerId::from_raw("p1"), None, 32.0);
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].id.as_str(), "p2");
        assert_eq!(nearby[0].username, "P2");
        assert!((nearby[0].volume - 0.8187).abs() < 1e-4, "got {}", nearby[0].volume);

        // Symmetry at equal radii.
        let back = engine.compute_nearby(&PlayerId::from_raw("p2"), None, 32.0);
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].id.as_str(), "p1");
    }

    #[test]
    fn radius_cuts_off_distant_players() {
        let engine = engine_with(vec![
            ("p1", 0.0, 0.0, 0.0, "w"),
            ("p2", 10.0, 0.0, 0.0, "w"),
        ]);

        assert!(engine
            .compute_nearby(&PlayerId::from_raw("p1"), None, 5.0)
            .is_empty());
        assert!(engine
            .compute_nearby(&PlayerId::from_raw("p2"), None, 5.0)
            .is_empty());
    }

    #[test]
    fn exact_radius_is_inclusive() {
        let engine = engine_with(vec![
            ("p1", 0.0, 0.0, 0.0, "w"),
            ("p2", 10.0, 0.0, 0.0, "w"),
        ]);

        let nearby = engine.compute_nearby(&PlayerId::from_raw("p1"), None, 10.0);
        assert_eq!(nearby.len(), 1);
    }

    #[test]
    fn worlds_partition_proximity() {
        let engine = engine_with(vec![
            ("p1", 0.0, 0.0, 0.0, "overworld"),
            ("p2", 1.0, 0.0, 0.0, "nether"),
        ]);

        assert!(engine
            .compute_nearby(&PlayerId::from_raw("p1"), None, 32.0)
            .is_empty());
        assert!(engine
            .compute_nearby(&PlayerId::from_raw("p2"), None, 32.0)
            .is_empty());
    }

    #[test]
    fn unlocated_subject_yields_empty_not_error() {
        let engine = engine_with(vec![("p2", 0.0, 0.0, 0.0, "w")]);
        assert!(engine
            .compute_nearby(&PlayerId::from_raw("ghost"), None, 32.0)
            .is_empty());
    }

    #[test]
    fn registry_fallback_locates_subject_missing_from_snapshot() {
        let engine = engine_with(vec![("p2", 3.0, 4.0, 0.0, "w")]);

        let fallback = Some((Vec3::new(0.0, 0.0, 0.0), WorldId::from_raw("w")));
        let nearby = engine.compute_nearby(&PlayerId::from_raw("p1"), fallback, 32.0);
        assert_eq!(nearby.len(), 1);
        assert!((nearby[0].volume - volume_at(5.0, DEFAULT_ATTENUATION)).abs() < 1e-12);
    }

    #[test]
    fn store_position_wins_over_fallback() {
        let engine = engine_with(vec![
            ("p1", 0.0, 0.0, 0.0, "w"),
            ("p2", 10.0, 0.0, 0.0, "w"),
        ]);

        // Stale cached position far away; the snapshot's origin must win.
        let stale = Some((Vec3::new(1000.0, 0.0, 0.0), WorldId::from_raw("w")));
        let nearby = engine.compute_nearby(&PlayerId::from_raw("p1"), stale, 32.0);
        assert_eq!(nearby.len(), 1);
    }

    #[test]
    fn subject_is_never_its_own_neighbor() {
        let engine = engine_with(vec![("p1", 0.0, 0.0, 0.0, "w")]);
        assert!(engine
            .compute_nearby(&PlayerId::from_raw("p1"), None, 32.0)
            .is_empty());
    }

    #[test]
    fn pair_volume_uses_distance_when_both_resolved() {
        let engine = engine_with(vec![]);
        let v = engine.pair_volume(
            Some(Vec3::new(0.0, 0.0, 0.0)),
            Some(Vec3::new(10.0, 0.0, 0.0)),
            32.0,
        );
        assert!((v - volume_at(10.0, DEFAULT_ATTENUATION)).abs() < 1e-12);
    }

    #[test]
    fn pair_volume_falls_back_when_either_side_unknown() {
        let engine = engine_with(vec![]);
        let expected = volume_at(32.0, DEFAULT_ATTENUATION);

        let v = engine.pair_volume(None, Some(Vec3::new(0.0, 0.0, 0.0)), 32.0);
        assert!((v - expected).abs() < 1e-12);

        let v = engine.pair_volume(Some(Vec3::new(0.0, 0.0, 0.0)), None, 32.0);
        assert!((v - expected).abs() < 1e-12);
    }
}
