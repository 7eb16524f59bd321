use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::{allocate_excluding, now_ms, today, validate_stay};
use super::{apply_booking_delete, apply_booking_row, Engine, EngineError, WalCommand};

impl Engine {
    // ── Room types ───────────────────────────────────────────────

    pub async fn create_room_type(
        &self,
        id: Ulid,
        hotel_id: Ulid,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        if let Some(n) = &name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::InvalidArgument("room type name too long"));
            }
        if self.state.len() >= MAX_ROOM_TYPES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many room types"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.wal_append(&Event::RoomTypeCreated {
            id,
            hotel_id,
            name: name.clone(),
        })
        .await?;
        let rt = RoomTypeState::new(id, hotel_id, name);
        self.state.insert(id, Arc::new(RwLock::new(rt)));
        Ok(())
    }

    pub async fn update_room_type(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        if let Some(n) = &name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::InvalidArgument("room type name too long"));
            }
        let rt = self.get_room_type(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rt.write().await;
        self.persist_and_apply(id, &mut guard, &Event::RoomTypeUpdated { id, name })
            .await
    }

    /// Deletion requires the room type to be empty — rooms (and therefore
    /// bookings, which can only target registered rooms) must go first.
    pub async fn delete_room_type(&self, id: Ulid) -> Result<(), EngineError> {
        let rt = self.get_room_type(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rt.write().await;
        if !guard.rooms.is_empty() {
            return Err(EngineError::HasRooms(id));
        }
        self.wal_append(&Event::RoomTypeDeleted { id }).await?;
        drop(guard);
        self.state.remove(&id);
        self.notify.send(id, &Event::RoomTypeDeleted { id });
        self.notify.remove(&id);
        Ok(())
    }

    // ── Rooms ────────────────────────────────────────────────────

    pub async fn add_room(
        &self,
        id: Ulid,
        room_type_id: Ulid,
        name: String,
        status: RoomStatus,
    ) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::InvalidArgument("room name too long"));
        }
        let rt = self
            .get_room_type(&room_type_id)
            .ok_or(EngineError::NotFound(room_type_id))?;
        let mut guard = rt.write().await;
        if guard.rooms.len() >= MAX_ROOMS_PER_TYPE {
            return Err(EngineError::LimitExceeded("too many rooms for room type"));
        }
        if guard.room(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        self.persist_and_apply(
            room_type_id,
            &mut guard,
            &Event::RoomAdded {
                id,
                room_type_id,
                name,
                status,
            },
        )
        .await
    }

    /// A room with bookings on record cannot be removed — delete the
    /// bookings first so their history stays resolvable.
    pub async fn remove_room(&self, id: Ulid) -> Result<(), EngineError> {
        let (room_type_id, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.room(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        if guard.bookings.iter().any(|b| b.room_id == id) {
            return Err(EngineError::InvalidArgument("room still has bookings"));
        }
        self.persist_and_apply(room_type_id, &mut guard, &Event::RoomRemoved { id, room_type_id })
            .await
    }

    /// Set the status of any set of rooms, possibly spanning room types.
    /// Returns how many rooms actually changed. Unknown ids are an error —
    /// an operator marking rooms MAINTAINED should not silently miss one.
    pub async fn set_room_status(
        &self,
        room_ids: &[Ulid],
        status: RoomStatus,
    ) -> Result<usize, EngineError> {
        if room_ids.is_empty() {
            return Err(EngineError::InvalidArgument("no room ids given"));
        }
        if room_ids.len() > MAX_IN_CLAUSE_IDS {
            return Err(EngineError::LimitExceeded("too many room ids"));
        }

        let mut by_type: HashMap<Ulid, Vec<Ulid>> = HashMap::new();
        for id in room_ids {
            let type_id = self
                .get_room_type_for_entity(id)
                .ok_or(EngineError::NotFound(*id))?;
            by_type.entry(type_id).or_default().push(*id);
        }

        // Lock in ascending room-type order, same as reservation commit.
        let mut type_ids: Vec<Ulid> = by_type.keys().copied().collect();
        type_ids.sort_unstable();

        let mut affected = 0;
        for type_id in type_ids {
            let rt = self
                .get_room_type(&type_id)
                .ok_or(EngineError::NotFound(type_id))?;
            let mut guard = rt.write().await;
            let ids = &by_type[&type_id];
            if ids.iter().any(|id| guard.room(id).is_none()) {
                return Err(EngineError::NotFound(type_id));
            }
            let event = Event::RoomStatusChanged {
                room_type_id: type_id,
                room_ids: ids.clone(),
                status,
            };
            self.persist_and_apply(type_id, &mut guard, &event).await?;
            affected += ids.len();
        }
        Ok(affected)
    }

    // ── Reservations ─────────────────────────────────────────────

    /// Commit a multi-room-type reservation atomically: every requested
    /// room across every line, or nothing.
    ///
    /// Write locks on all involved room types are taken in ascending id
    /// order and held from validation through apply, so two racing
    /// reservations can never interleave — the loser observes the winner's
    /// bookings and fails with `InsufficientAvailability`.
    pub async fn create_reservation(
        &self,
        lines: &[ReservationLine],
        stay: StayRange,
        total_minor: i64,
        user_id: Ulid,
    ) -> Result<Vec<CreatedBooking>, EngineError> {
        if lines.is_empty() {
            return Err(EngineError::InvalidArgument("reservation has no lines"));
        }
        if lines.len() > MAX_LINES_PER_RESERVATION {
            return Err(EngineError::LimitExceeded("too many reservation lines"));
        }
        if total_minor < 0 {
            return Err(EngineError::InvalidArgument("total must not be negative"));
        }
        validate_stay(&stay)?;
        let room_count: u64 = lines.iter().map(|l| u64::from(l.count)).sum();
        if room_count as usize > MAX_ROOMS_PER_RESERVATION {
            return Err(EngineError::LimitExceeded("too many rooms in one reservation"));
        }

        // Phase 1: lock every involved room type, ascending id order.
        let mut type_ids: Vec<Ulid> = lines.iter().map(|l| l.room_type_id).collect();
        type_ids.sort_unstable();
        type_ids.dedup();

        let mut guards = Vec::with_capacity(type_ids.len());
        let mut guard_idx: HashMap<Ulid, usize> = HashMap::with_capacity(type_ids.len());
        for type_id in &type_ids {
            let rt = self
                .get_room_type(type_id)
                .ok_or(EngineError::NotFound(*type_id))?;
            let guard = rt.write_owned().await;
            if guard.bookings.len() + room_count as usize > MAX_BOOKINGS_PER_TYPE {
                return Err(EngineError::LimitExceeded("too many bookings for room type"));
            }
            guard_idx.insert(*type_id, guards.len());
            guards.push(guard);
        }

        // Phase 2: allocate under the locks. `claimed` keeps lines that
        // repeat a room type from being handed the same room twice.
        let created_at = now_ms();
        let mut rows: Vec<BookingRow> = Vec::with_capacity(room_count as usize);
        let mut claimed: HashMap<Ulid, HashSet<Ulid>> = HashMap::new();
        for line in lines {
            let guard = &guards[guard_idx[&line.room_type_id]];
            let line_claimed = claimed.entry(line.room_type_id).or_default();
            let rooms = allocate_excluding(guard, &stay, line.count, line_claimed)?;
            for room_id in rooms {
                line_claimed.insert(room_id);
                rows.push(BookingRow {
                    id: Ulid::new(),
                    room_type_id: line.room_type_id,
                    room_id,
                    hotel_id: guard.hotel_id,
                    user_id,
                    stay,
                    total_minor,
                    created_at,
                });
            }
        }

        // Re-validate before commit: no selected room may carry an
        // overlapping booking. The locks make this unreachable in normal
        // operation; a hit means allocation state drifted, and failing
        // with a retryable Conflict beats persisting a double-booking.
        for row in &rows {
            let guard = &guards[guard_idx[&row.room_type_id]];
            if guard
                .overlapping(&stay)
                .any(|b| b.room_id == row.room_id)
            {
                return Err(EngineError::Conflict(row.room_id));
            }
        }

        // Phase 3: one WAL record for the whole reservation, then apply.
        let event = Event::ReservationCommitted { bookings: rows.clone() };
        self.wal_append(&event).await?;
        for row in &rows {
            let guard = &mut guards[guard_idx[&row.room_type_id]];
            apply_booking_row(guard, row, &self.entity_to_type);
        }
        for type_id in &type_ids {
            self.notify.send(*type_id, &event);
        }
        metrics::counter!(observability::RESERVATIONS_COMMITTED_TOTAL).increment(1);
        metrics::counter!(observability::ROOMS_BOOKED_TOTAL).increment(rows.len() as u64);

        Ok(rows
            .iter()
            .map(|r| CreatedBooking {
                id: r.id,
                room_type_id: r.room_type_id,
                room_id: r.room_id,
            })
            .collect())
    }

    /// Delete bookings by id, releasing each room back to FREE when no
    /// other booking keeps it occupied past today. All-or-nothing: an
    /// unknown id fails the whole batch.
    pub async fn delete_bookings(&self, ids: &[Ulid]) -> Result<usize, EngineError> {
        if ids.is_empty() {
            return Err(EngineError::InvalidArgument("no booking ids given"));
        }
        if ids.len() > MAX_IN_CLAUSE_IDS {
            return Err(EngineError::LimitExceeded("too many booking ids"));
        }

        // IN ('x','x') names one row once; dedupe so the WAL records one
        // delete per booking and the affected count matches reality.
        let mut ids: Vec<Ulid> = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut by_type: HashMap<Ulid, Vec<Ulid>> = HashMap::new();
        for id in &ids {
            let type_id = self
                .get_room_type_for_entity(id)
                .ok_or(EngineError::NotFound(*id))?;
            by_type.entry(type_id).or_default().push(*id);
        }

        let mut type_ids: Vec<Ulid> = by_type.keys().copied().collect();
        type_ids.sort_unstable();

        let mut guards = Vec::with_capacity(type_ids.len());
        let mut guard_idx: HashMap<Ulid, usize> = HashMap::with_capacity(type_ids.len());
        for type_id in &type_ids {
            let rt = self
                .get_room_type(type_id)
                .ok_or(EngineError::NotFound(*type_id))?;
            guard_idx.insert(*type_id, guards.len());
            guards.push(rt.write_owned().await);
        }

        let today = today();
        let deleting: HashSet<Ulid> = ids.iter().copied().collect();
        let mut deleted: Vec<DeletedBooking> = Vec::with_capacity(ids.len());
        for type_id in &type_ids {
            let guard = &guards[guard_idx[type_id]];
            for id in &by_type[type_id] {
                let booking = guard
                    .bookings
                    .iter()
                    .find(|b| b.id == *id)
                    .ok_or(EngineError::NotFound(*id))?;
                // Release unless another surviving booking still holds the
                // room for a night from today onward.
                let still_held = guard.bookings.iter().any(|b| {
                    b.room_id == booking.room_id
                        && b.id != *id
                        && !deleting.contains(&b.id)
                        && b.stay.check_out > today
                });
                let is_occupied = guard
                    .room(&booking.room_id)
                    .is_some_and(|r| r.status == RoomStatus::Occupied);
                deleted.push(DeletedBooking {
                    id: *id,
                    room_type_id: *type_id,
                    room_id: booking.room_id,
                    release_room: is_occupied && !still_held,
                });
            }
        }

        let event = Event::BookingsDeleted { bookings: deleted.clone() };
        self.wal_append(&event).await?;
        for del in &deleted {
            let guard = &mut guards[guard_idx[&del.room_type_id]];
            apply_booking_delete(guard, del, &self.entity_to_type);
        }
        for type_id in &type_ids {
            self.notify.send(*type_id, &event);
        }
        metrics::counter!(observability::BOOKINGS_DELETED_TOTAL).increment(deleted.len() as u64);
        Ok(deleted.len())
    }

    // ── Housekeeping ─────────────────────────────────────────────

    /// Release OCCUPIED rooms whose last booking has checked out as of
    /// `today`. The candidate scan and the FREE transition run under the
    /// same write lock, so a reservation committed while the sweep is in
    /// flight keeps its room OCCUPIED. Returns the number of rooms
    /// released.
    pub async fn release_checked_out_rooms(&self, today: NaiveDate) -> Result<usize, EngineError> {
        let type_ids: Vec<Ulid> = self.state.iter().map(|entry| *entry.key()).collect();
        let mut released = 0;
        for type_id in type_ids {
            // Room type may be deleted between the scan and here
            let Some(rt) = self.get_room_type(&type_id) else {
                continue;
            };
            let mut guard = rt.write().await;
            let room_ids: Vec<Ulid> = guard
                .rooms
                .iter()
                .filter(|room| {
                    room.status == RoomStatus::Occupied
                        && !guard.room_has_booking_after(&room.id, today)
                })
                .map(|room| room.id)
                .collect();
            if room_ids.is_empty() {
                continue;
            }
            let event = Event::RoomStatusChanged {
                room_type_id: type_id,
                room_ids: room_ids.clone(),
                status: RoomStatus::Free,
            };
            self.persist_and_apply(type_id, &mut guard, &event).await?;
            released += room_ids.len();
        }
        Ok(released)
    }

    // ── WAL maintenance ──────────────────────────────────────────

    /// Rewrite the WAL as a minimal snapshot of live state. The snapshot is
    /// built from per-room-type reads; the writer task does the slow file
    /// I/O and the atomic swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        for entry in self.state.iter() {
            let guard = entry.value().read().await;
            events.push(Event::RoomTypeCreated {
                id: guard.id,
                hotel_id: guard.hotel_id,
                name: guard.name.clone(),
            });
            for room in &guard.rooms {
                events.push(Event::RoomAdded {
                    id: room.id,
                    room_type_id: guard.id,
                    name: room.name.clone(),
                    status: room.status,
                });
            }
            if !guard.bookings.is_empty() {
                events.push(Event::ReservationCommitted {
                    bookings: guard
                        .bookings
                        .iter()
                        .map(|b| BookingRow {
                            id: b.id,
                            room_type_id: guard.id,
                            room_id: b.room_id,
                            hotel_id: guard.hotel_id,
                            user_id: b.user_id,
                            stay: b.stay,
                            total_minor: b.total_minor,
                            created_at: b.created_at,
                        })
                        .collect(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
