//! Registry of open rooms
//!
//! Rooms are independent; the manager only hands out shared handles and
//! closes rooms nobody is connected to.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use super::{Room, RoomDeps, RoomInfo};
use crate::{models::RoomId, Error, Result};

pub struct RoomManager {
    rooms: DashMap<RoomId, Arc<Room>>,
    deps: RoomDeps,
}

impl RoomManager {
    #[must_use]
    pub fn new(deps: RoomDeps) -> Self {
        Self {
            rooms: DashMap::new(),
            deps,
        }
    }

    #[must_use]
    pub const fn deps(&self) -> &RoomDeps {
        &self.deps
    }

    /// The open room with this ID, opening it from `info` if needed
    ///
    /// `info` is ignored when the room is already open.
    #[must_use]
    pub fn load_or_insert(&self, info: RoomInfo) -> Arc<Room> {
        let room_id = info.id.clone();
        let room = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                info!(room_id = %room_id, "Opening room");
                Arc::new(Room::new(info, self.deps.clone()))
            });
        Arc::clone(&room)
    }

    pub fn get(&self, room_id: &RoomId) -> Result<Arc<Room>> {
        self.rooms
            .get(room_id)
            .map(|room| Arc::clone(&room))
            .ok_or_else(|| Error::NotFound(format!("Room {room_id} is not open")))
    }

    /// Close and forget one room; false if it was not open
    pub fn close_room(&self, room_id: &RoomId) -> bool {
        let Some((_, room)) = self.rooms.remove(room_id) else {
            return false;
        };
        room.close();
        true
    }

    /// Close every room without connected users
    pub fn close_idle_rooms(&self) -> usize {
        let idle: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().people_num() == 0)
            .map(|entry| entry.key().clone())
            .collect();

        let mut closed = 0;
        for room_id in idle {
            // someone may have connected since the scan
            if let Some((_, room)) = self
                .rooms
                .remove_if(&room_id, |_, room| room.people_num() == 0)
            {
                room.close();
                closed += 1;
            }
        }
        if closed > 0 {
            info!(closed, remaining = self.rooms.len(), "Closed idle rooms");
        }
        closed
    }

    pub fn close_all(&self) {
        let room_ids: Vec<RoomId> = self.rooms.iter().map(|e| e.key().clone()).collect();
        for room_id in room_ids {
            self.close_room(&room_id);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
