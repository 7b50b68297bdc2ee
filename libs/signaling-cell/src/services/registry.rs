// libs/signaling-cell/src/services/registry.rs
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{Participant, Room, SignalingError};

pub const MAX_PARTICIPANTS: usize = 2;

#[derive(Default)]
struct RoomTable {
    rooms: HashMap<Uuid, Room>,
    by_consultation: HashMap<Uuid, Uuid>,
}

/// In-memory table of live rooms.
///
/// One mutex guards the whole table, so find-or-create and the two-slot
/// capacity check are atomic. Every method is synchronous and the lock is
/// never held across an `.await`.
#[derive(Default)]
pub struct RoomRegistry {
    table: Mutex<RoomTable>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RoomTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Room bound to `consultation_id`, created on first call.
    pub fn find_or_create_for_consultation(&self, consultation_id: Uuid) -> Room {
        let mut table = self.lock();

        if let Some(room) = table
            .by_consultation
            .get(&consultation_id)
            .and_then(|room_id| table.rooms.get(room_id))
        {
            return room.clone();
        }

        let room = Room::new(Some(consultation_id));
        table.by_consultation.insert(consultation_id, room.id);
        table.rooms.insert(room.id, room.clone());
        info!("Created room {} for consultation {}", room.id, consultation_id);
        room
    }

    pub fn create_standalone(&self) -> Room {
        let room = Room::new(None);
        self.lock().rooms.insert(room.id, room.clone());
        info!("Created standalone room {}", room.id);
        room
    }

    pub fn get(&self, room_id: Uuid) -> Option<Room> {
        self.lock().rooms.get(&room_id).cloned()
    }

    pub fn find_by_consultation(&self, consultation_id: Uuid) -> Option<Uuid> {
        self.lock().by_consultation.get(&consultation_id).copied()
    }

    /// Upsert by user id. A user already in the room is replaced in place; a
    /// third distinct user is refused. Returns the participants after the
    /// join, in arrival order.
    pub fn add_participant(
        &self,
        room_id: Uuid,
        participant: Participant,
    ) -> Result<Vec<Participant>, SignalingError> {
        let mut table = self.lock();
        let room = table
            .rooms
            .get_mut(&room_id)
            .ok_or(SignalingError::RoomNotFound)?;

        if let Some(existing) = room
            .participants
            .iter_mut()
            .find(|p| p.user_id == participant.user_id)
        {
            debug!("Replacing participant {} in room {}", participant.user_id, room_id);
            *existing = participant;
        } else if room.is_full() {
            debug!("Room {} is full, refusing {}", room_id, participant.user_id);
            return Err(SignalingError::RoomFull);
        } else {
            room.participants.push(participant);
        }

        Ok(room.participants.clone())
    }

    pub fn participants(&self, room_id: Uuid) -> Option<Vec<Participant>> {
        self.lock()
            .rooms
            .get(&room_id)
            .map(|room| room.participants.clone())
    }

    pub fn remove_participant(&self, room_id: Uuid, user_id: &str) -> Option<Participant> {
        let mut table = self.lock();
        let room = table.rooms.get_mut(&room_id)?;
        let index = room.participants.iter().position(|p| p.user_id == user_id)?;
        Some(room.participants.remove(index))
    }

    /// Destroy the room and its participant state.
    pub fn end(&self, room_id: Uuid) -> Option<Room> {
        let mut table = self.lock();
        let room = table.rooms.remove(&room_id)?;
        if let Some(consultation_id) = room.consultation_id {
            if table.by_consultation.get(&consultation_id) == Some(&room_id) {
                table.by_consultation.remove(&consultation_id);
            }
        }
        info!("Ended room {}", room_id);
        Some(room)
    }

    pub fn end_for_consultation(&self, consultation_id: Uuid) -> Option<Room> {
        let room_id = self.find_by_consultation(consultation_id)?;
        self.end(room_id)
    }

    pub fn len(&self) -> usize {
        self.lock().rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
