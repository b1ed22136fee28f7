//! Broadcast scheduler: one fixed-cadence timer drives every client's
//! proximity recomputation. Each tick carries current truth — a frame
//! dropped on an unwritable transport is simply superseded by the next tick.

use earshot_core::protocol::ServerMessage;
use earshot_core::PlayerId;

use crate::server::RelayState;

/// Spawn the periodic broadcast task.
pub fn start(state: RelayState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.broadcast_interval);
        loop {
            ticker.tick().await;
            tick(&state);
        }
    })
}

/// One broadcast cycle. Per connected client: re-sync its cached position
/// from the store (the store owns coordinates and world), then push a fresh
/// nearby list. Clients disconnecting mid-cycle only lose their own push.
pub fn tick(state: &RelayState) {
    for id in state.registry.player_ids() {
        if let Some(authoritative) = state.store.get(&id) {
            state.registry.sync_from_store(&id, &authoritative);
        }
        push_nearby(state, &id);
    }
}

/// Compute and push one client's nearby list. Shared by the tick loop and
/// the out-of-band push at join.
pub fn push_nearby(state: &RelayState, id: &PlayerId) {
    let Some(snap) = state.registry.snapshot(id) else {
        return; // gone between the id snapshot and now
    };
    let fallback = snap
        .position
        .map(|pos| (pos, snap.world.unwrap_or_default()));
    let players = state.engine.compute_nearby(id, fallback, snap.radius);
    state.registry.send_message(id, &ServerMessage::Nearby { players });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerConfig;
    use earshot_core::protocol::IngestPlayer;
    use earshot_core::{Vec3, WorldId};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    fn state_with_positions() -> RelayState {
        let state = RelayState::new(ServerConfig::default());
        let players: Vec<IngestPlayer> = serde_json::from_value(json!([
            {"playerId": "p1", "x": 0.0, "y": 0.0, "z": 0.0, "worldId": "w"},
            {"playerId": "p2", "x": 10.0, "y": 0.0, "z": 0.0, "worldId": "w"},
        ]))
        .unwrap();
        state
            .store
            .replace_all(players.into_iter().map(IngestPlayer::into_entry));
        state
    }

    fn register(state: &RelayState, id: &str, capacity: usize) -> (u64, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let epoch = state.registry.register(
            PlayerId::from_raw(id),
            id.to_owned(),
            32.0,
            tx,
            None,
        );
        (epoch, rx)
    }

    fn recv(rx: &mut mpsc::Receiver<String>) -> Value {
        serde_json::from_str(&rx.try_recv().expect("expected a frame")).unwrap()
    }

    #[test]
    fn tick_pushes_a_nearby_frame_to_every_client() {
        let state = state_with_positions();
        let (_e1, mut rx1) = register(&state, "p1", 8);
        let (_e2, mut rx2) = register(&state, "p2", 8);

        tick(&state);

        let nearby = recv(&mut rx1);
        assert_eq!(nearby["type"], "nearby");
        assert_eq!(nearby["players"][0]["id"], "p2");

        let nearby = recv(&mut rx2);
        assert_eq!(nearby["players"][0]["id"], "p1");
    }

    #[test]
    fn tick_syncs_cached_positions_from_the_store() {
        let state = state_with_positions();
        let id = PlayerId::from_raw("p1");
        let (_e, _rx) = register(&state, "p1", 8);
        state
            .registry
            .update_position(&id, Some(Vec3::new(999.0, 0.0, 0.0)), Some(WorldId::from_raw("stale")));

        tick(&state);

        let snap = state.registry.snapshot(&id).unwrap();
        assert_eq!(snap.position, Some(Vec3::new(0.0, 0.0, 0.0)));
        assert_eq!(snap.world.unwrap().as_str(), "w");
    }

    #[test]
    fn self_reported_position_survives_when_store_lacks_the_player() {
        let state = state_with_positions();
        let id = PlayerId::from_raw("p3");
        let (_e, mut rx) = register(&state, "p3", 8);
        state
            .registry
            .update_position(&id, Some(Vec3::new(5.0, 0.0, 0.0)), Some(WorldId::from_raw("w")));

        tick(&state);

        // p3 is absent from the snapshot, so its self-report still places it.
        let nearby = recv(&mut rx);
        assert_eq!(nearby["players"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn unregistering_mid_cycle_leaves_other_clients_unaffected() {
        let state = state_with_positions();
        let (e1, _rx1) = register(&state, "p1", 8);
        let (_e2, mut rx2) = register(&state, "p2", 8);

        assert!(state.registry.unregister(&PlayerId::from_raw("p1"), e1));
        tick(&state);

        let nearby = recv(&mut rx2);
        assert_eq!(nearby["type"], "nearby");
    }

    #[test]
    fn full_queue_drops_the_tick_without_disturbing_the_cycle() {
        let state = state_with_positions();
        let (_e1, _rx1) = register(&state, "p1", 1);
        let (_e2, mut rx2) = register(&state, "p2", 8);

        tick(&state); // fills p1's queue
        tick(&state); // p1's frame drops; p2 still served

        assert_eq!(recv(&mut rx2)["type"], "nearby");
        assert_eq!(recv(&mut rx2)["type"], "nearby");
    }
}
