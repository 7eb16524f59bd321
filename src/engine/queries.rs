use ulid::Ulid;

use crate::model::*;

use super::availability::{available_room_ids, occupancy, validate_stay};
use super::{Engine, EngineError};

impl Engine {
    /// Free room ids of one room type over a stay, ascending id. An
    /// unknown room type reads as empty — to a caller probing
    /// availability there is no difference.
    pub async fn available_rooms(
        &self,
        room_type_id: &Ulid,
        stay: &StayRange,
        limit: Option<usize>,
    ) -> Result<Vec<Ulid>, EngineError> {
        validate_stay(stay)?;
        let Some(rt) = self.get_room_type(room_type_id) else {
            return Ok(Vec::new());
        };
        let guard = rt.read().await;
        Ok(available_room_ids(&guard, stay, limit))
    }

    /// Free/total counts for a set of room types over a stay — the search
    /// fan-out. Unknown ids are skipped rather than failing the batch.
    pub async fn occupancy_counts(
        &self,
        room_type_ids: &[Ulid],
        stay: &StayRange,
    ) -> Result<Vec<OccupancyInfo>, EngineError> {
        validate_stay(stay)?;
        let mut out = Vec::with_capacity(room_type_ids.len());
        for id in room_type_ids {
            if let Some(rt) = self.get_room_type(id) {
                let guard = rt.read().await;
                out.push(occupancy(&guard, stay));
            }
        }
        Ok(out)
    }

    pub async fn list_room_types(&self) -> Vec<RoomTypeInfo> {
        let mut out = Vec::with_capacity(self.state.len());
        for entry in self.state.iter() {
            let guard = entry.value().read().await;
            out.push(RoomTypeInfo {
                id: guard.id,
                hotel_id: guard.hotel_id,
                name: guard.name.clone(),
            });
        }
        out.sort_unstable_by_key(|rt| rt.id);
        out
    }

    pub async fn get_rooms(&self, room_type_id: &Ulid) -> Result<Vec<RoomInfo>, EngineError> {
        let rt = self
            .get_room_type(room_type_id)
            .ok_or(EngineError::NotFound(*room_type_id))?;
        let guard = rt.read().await;
        Ok(guard
            .rooms
            .iter()
            .map(|r| RoomInfo {
                id: r.id,
                room_type_id: guard.id,
                name: r.name.clone(),
                status: r.status,
            })
            .collect())
    }

    pub async fn get_bookings(&self, room_type_id: &Ulid) -> Result<Vec<BookingInfo>, EngineError> {
        let rt = self
            .get_room_type(room_type_id)
            .ok_or(EngineError::NotFound(*room_type_id))?;
        let guard = rt.read().await;
        Ok(guard.bookings.iter().map(|b| booking_info(&guard, b)).collect())
    }

    /// Every booking this user holds, across all room types. Full scan —
    /// acceptable at current tenant sizes; an index can come later if user
    /// lookups get hot.
    pub async fn get_bookings_for_user(&self, user_id: &Ulid) -> Vec<BookingInfo> {
        let mut out = Vec::new();
        for entry in self.state.iter() {
            let guard = entry.value().read().await;
            for b in guard.bookings.iter().filter(|b| b.user_id == *user_id) {
                out.push(booking_info(&guard, b));
            }
        }
        out.sort_unstable_by_key(|b| b.id);
        out
    }
}

fn booking_info(rt: &RoomTypeState, b: &Booking) -> BookingInfo {
    BookingInfo {
        id: b.id,
        room_type_id: rt.id,
        room_id: b.room_id,
        hotel_id: rt.hotel_id,
        user_id: b.user_id,
        stay: b.stay,
        total_minor: b.total_minor,
    }
}
