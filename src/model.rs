use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — used for record timestamps and WAL bookkeeping.
pub type Ms = i64;

/// Half-open stay interval `[check_in, check_out)` — a guest who checks out
/// on a day does not occupy the room that night.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayRange {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayRange {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in < check_out, "check_in must be before check_out");
        Self { check_in, check_out }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    /// Two stays intersect iff a.check_in < b.check_out AND b.check_in < a.check_out.
    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.check_in <= day && day < self.check_out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Free,
    Occupied,
    Maintained,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Free => "FREE",
            RoomStatus::Occupied => "OCCUPIED",
            RoomStatus::Maintained => "MAINTAINED",
        }
    }

    pub fn parse(s: &str) -> Option<RoomStatus> {
        match s.to_uppercase().as_str() {
            "FREE" => Some(RoomStatus::Free),
            "OCCUPIED" => Some(RoomStatus::Occupied),
            "MAINTAINED" => Some(RoomStatus::Maintained),
            _ => None,
        }
    }
}

/// A physical room. Status is the only field booking logic mutates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub status: RoomStatus,
}

/// One booking row: one room for one stay. Immutable once created except
/// for explicit deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub stay: StayRange,
    pub total_minor: i64,
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// All state for one room type: its rooms and every booking against them.
/// This is the unit of locking — allocation for a room type needs a
/// consistent view of both vectors at once.
#[derive(Debug, Clone)]
pub struct RoomTypeState {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub name: Option<String>,
    /// Sorted by room id — keeps allocation order deterministic.
    pub rooms: Vec<Room>,
    /// Sorted by `stay.check_in`.
    pub bookings: Vec<Booking>,
}

impl RoomTypeState {
    pub fn new(id: Ulid, hotel_id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            hotel_id,
            name,
            rooms: Vec::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert a room maintaining ascending-id order. Returns false if the
    /// id is already present.
    pub fn insert_room(&mut self, room: Room) -> bool {
        match self.rooms.binary_search_by_key(&room.id, |r| r.id) {
            Ok(_) => false,
            Err(pos) => {
                self.rooms.insert(pos, room);
                true
            }
        }
    }

    pub fn remove_room(&mut self, id: Ulid) -> Option<Room> {
        match self.rooms.binary_search_by_key(&id, |r| r.id) {
            Ok(pos) => Some(self.rooms.remove(pos)),
            Err(_) => None,
        }
    }

    pub fn room(&self, id: &Ulid) -> Option<&Room> {
        self.rooms
            .binary_search_by_key(id, |r| r.id)
            .ok()
            .map(|pos| &self.rooms[pos])
    }

    /// Set status on a list of rooms. Returns the number of rooms touched.
    pub fn set_status(&mut self, room_ids: &[Ulid], status: RoomStatus) -> usize {
        let mut affected = 0;
        for id in room_ids {
            if let Ok(pos) = self.rooms.binary_search_by_key(id, |r| r.id) {
                self.rooms[pos].status = status;
                affected += 1;
            }
        }
        affected
    }

    /// Insert a booking maintaining sort order by check_in.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.stay.check_in, |b| b.stay.check_in)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == id) {
            Some(self.bookings.remove(pos))
        } else {
            None
        }
    }

    /// Bookings whose stay overlaps the query stay. Binary search skips
    /// bookings checking in at or after `stay.check_out`.
    pub fn overlapping(&self, stay: &StayRange) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.stay.check_in < stay.check_out);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.stay.check_out > stay.check_in)
    }

    /// True if the room has any booking that has not yet checked out.
    pub fn room_has_booking_after(&self, room_id: &Ulid, day: NaiveDate) -> bool {
        self.bookings
            .iter()
            .any(|b| b.room_id == *room_id && b.stay.check_out > day)
    }
}

/// One booking as committed by a reservation — carries everything replay
/// needs to reconstruct the row on the right room type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRow {
    pub id: Ulid,
    pub room_type_id: Ulid,
    pub room_id: Ulid,
    pub hotel_id: Ulid,
    pub user_id: Ulid,
    pub stay: StayRange,
    pub total_minor: i64,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedBooking {
    pub id: Ulid,
    pub room_type_id: Ulid,
    pub room_id: Ulid,
    /// Whether the delete also transitions the room back to FREE.
    pub release_room: bool,
}

/// The event types — flat, no nesting. This is the WAL record format.
/// A reservation is ONE record no matter how many rooms it commits, so a
/// torn write can never persist half a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomTypeCreated {
        id: Ulid,
        hotel_id: Ulid,
        name: Option<String>,
    },
    RoomTypeUpdated {
        id: Ulid,
        name: Option<String>,
    },
    RoomTypeDeleted {
        id: Ulid,
    },
    RoomAdded {
        id: Ulid,
        room_type_id: Ulid,
        name: String,
        status: RoomStatus,
    },
    RoomRemoved {
        id: Ulid,
        room_type_id: Ulid,
    },
    RoomStatusChanged {
        room_type_id: Ulid,
        room_ids: Vec<Ulid>,
        status: RoomStatus,
    },
    ReservationCommitted {
        bookings: Vec<BookingRow>,
    },
    BookingsDeleted {
        bookings: Vec<DeletedBooking>,
    },
}

// ── Input / query result types ───────────────────────────────────

/// One line of a reservation request: how many rooms of a room type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationLine {
    pub room_type_id: Ulid,
    pub count: u32,
}

/// What the orchestrator hands back per committed booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedBooking {
    pub id: Ulid,
    pub room_type_id: Ulid,
    pub room_id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomTypeInfo {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub room_type_id: Ulid,
    pub name: String,
    pub status: RoomStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub room_type_id: Ulid,
    pub room_id: Ulid,
    pub hotel_id: Ulid,
    pub user_id: Ulid,
    pub stay: StayRange,
    pub total_minor: i64,
}

/// Free-room count for one room type over a stay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyInfo {
    pub room_type_id: Ulid,
    pub total_rooms: u32,
    pub free_rooms: u32,
}
