//! Room registry - assigns connections to rooms and reclaims dead ones.
//!
//! The room map is the only mutable state shared between connection
//! arrivals, teardown, and the idle sweep. Every mutation goes through one
//! mutex, so two simultaneous arrivals can never both claim the last free
//! seat of a room.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::{GameMode, GameRoom, RoomCommand, RoomHandle, RoomState};
use crate::store::StatsStore;
use crate::util::time::unix_millis;

/// How often the background sweep runs
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A Waiting room untouched for this long is reclaimed
pub const IDLE_TIMEOUT_MILLIS: u64 = 5 * 60 * 1000;

/// Registry of all live rooms
pub struct RoomRegistry {
    rooms: Mutex<HashMap<Uuid, RoomHandle>>,
    stats: StatsStore,
}

impl RoomRegistry {
    pub fn new(stats: StatsStore) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            stats,
        }
    }

    /// Seat a connection: first Waiting room of the mode with a free slot,
    /// or a brand-new room with this player as slot 1. Returns the room
    /// handle and the 1-based player number, fixed for the connection's
    /// lifetime.
    pub fn assign(self: &Arc<Self>, mode: GameMode) -> (RoomHandle, usize) {
        let mut rooms = self.rooms.lock();

        for handle in rooms.values() {
            if handle.mode != mode {
                continue;
            }
            if let Some(seat) = handle.try_reserve_seat() {
                handle.touch();
                debug!(room_id = %handle.id, seat, "Assigned to existing room");
                return (handle.clone(), seat);
            }
        }

        let (room, handle) = GameRoom::new(mode, self.stats.clone());
        rooms.insert(handle.id, handle.clone());
        info!(room_id = %handle.id, mode = ?mode, "Created new room");

        let registry = Arc::clone(self);
        let room_id = handle.id;
        tokio::spawn(async move {
            room.run().await;
            // Forced ends return immediately, normal ends after the grace
            // delay; either way the entry goes with the task.
            registry.remove(room_id);
        });

        (handle, 1)
    }

    pub fn get(&self, id: &Uuid) -> Option<RoomHandle> {
        self.rooms.lock().get(id).cloned()
    }

    pub fn remove(&self, id: Uuid) {
        if self.rooms.lock().remove(&id).is_some() {
            info!(room_id = %id, "Room removed from registry");
        }
    }

    /// Delete Waiting rooms idle past the threshold. Running rooms are
    /// never reclaimed here, whatever their age.
    pub fn sweep_idle(&self) {
        let now = unix_millis();
        let mut rooms = self.rooms.lock();
        rooms.retain(|id, handle| {
            let stale = handle.state() == RoomState::Waiting
                && handle.idle_millis(now) > IDLE_TIMEOUT_MILLIS;
            if stale {
                // A full command queue must not leave the task ticking
                // forever with its handle gone
                if handle.commands.try_send(RoomCommand::Expire).is_err() {
                    handle.mark_ended();
                }
                info!(room_id = %id, "Room reclaimed after idle timeout");
            }
            !stale
        });
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn seated_players(&self) -> usize {
        self.rooms
            .lock()
            .values()
            .filter(|h| h.state() != RoomState::Ended)
            .map(|h| h.seats_reserved())
            .sum()
    }
}
