mod availability;
mod error;
mod mutations;
mod queries;

pub use availability::{allocate, allocate_excluding, available_room_ids, booked_room_ids, occupancy};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomTypeState = Arc<RwLock<RoomTypeState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Per-tenant booking engine: room-type states, a booking/room → room-type
/// index, and a WAL writer task.
pub struct Engine {
    pub state: DashMap<Ulid, SharedRoomTypeState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: room id or booking id → room-type id.
    pub(super) entity_to_type: DashMap<Ulid, Ulid>,
}

/// Apply a single-room-type event to a state (no locking — caller holds
/// the lock). Multi-type events (`ReservationCommitted`, `BookingsDeleted`)
/// go through `apply_booking_row` / `apply_booking_delete` per row instead.
fn apply_to_room_type(rt: &mut RoomTypeState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomAdded {
            id,
            room_type_id,
            name,
            status,
        } => {
            rt.insert_room(Room {
                id: *id,
                name: name.clone(),
                status: *status,
            });
            entity_map.insert(*id, *room_type_id);
        }
        Event::RoomRemoved { id, .. } => {
            rt.remove_room(*id);
            entity_map.remove(id);
        }
        Event::RoomStatusChanged { room_ids, status, .. } => {
            rt.set_status(room_ids, *status);
        }
        Event::RoomTypeUpdated { name, .. } => {
            rt.name = name.clone();
        }
        // Handled at the DashMap level or per booking row, not here
        Event::RoomTypeCreated { .. }
        | Event::RoomTypeDeleted { .. }
        | Event::ReservationCommitted { .. }
        | Event::BookingsDeleted { .. } => {}
    }
}

/// Insert one committed booking row and mark its room OCCUPIED.
fn apply_booking_row(rt: &mut RoomTypeState, row: &BookingRow, entity_map: &DashMap<Ulid, Ulid>) {
    rt.insert_booking(Booking {
        id: row.id,
        stay: row.stay,
        total_minor: row.total_minor,
        room_id: row.room_id,
        user_id: row.user_id,
        created_at: row.created_at,
        updated_at: row.created_at,
    });
    rt.set_status(&[row.room_id], RoomStatus::Occupied);
    entity_map.insert(row.id, rt.id);
}

/// Remove one booking row, releasing the room when the delete said to.
fn apply_booking_delete(
    rt: &mut RoomTypeState,
    del: &DeletedBooking,
    entity_map: &DashMap<Ulid, Ulid>,
) {
    rt.remove_booking(del.id);
    if del.release_room {
        rt.set_status(&[del.room_id], RoomStatus::Free);
    }
    entity_map.remove(&del.id);
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_type: DashMap::new(),
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here because this may
        // run inside an async context (lazy tenant creation).
        for event in &events {
            match event {
                Event::RoomTypeCreated { id, hotel_id, name } => {
                    let rt = RoomTypeState::new(*id, *hotel_id, name.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(rt)));
                }
                Event::RoomTypeDeleted { id } => {
                    engine.state.remove(id);
                }
                Event::ReservationCommitted { bookings } => {
                    for row in bookings {
                        if let Some(entry) = engine.state.get(&row.room_type_id) {
                            let rt_arc = entry.value().clone();
                            let mut guard =
                                rt_arc.try_write().expect("replay: uncontended write");
                            apply_booking_row(&mut guard, row, &engine.entity_to_type);
                        }
                    }
                }
                Event::BookingsDeleted { bookings } => {
                    for del in bookings {
                        if let Some(entry) = engine.state.get(&del.room_type_id) {
                            let rt_arc = entry.value().clone();
                            let mut guard =
                                rt_arc.try_write().expect("replay: uncontended write");
                            apply_booking_delete(&mut guard, del, &engine.entity_to_type);
                        }
                    }
                }
                other => {
                    if let Some(type_id) = event_room_type_id(other)
                        && let Some(entry) = engine.state.get(&type_id) {
                            let rt_arc = entry.value().clone();
                            let mut guard =
                                rt_arc.try_write().expect("replay: uncontended write");
                            apply_to_room_type(&mut guard, other, &engine.entity_to_type);
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room_type(&self, id: &Ulid) -> Option<SharedRoomTypeState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_room_type_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_type.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call, for single-room-type events.
    pub(super) async fn persist_and_apply(
        &self,
        room_type_id: Ulid,
        rt: &mut RoomTypeState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room_type(rt, event, &self.entity_to_type);
        self.notify.send(room_type_id, event);
        Ok(())
    }

    /// Lookup entity → room type, get the state, acquire the write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RoomTypeState>), EngineError> {
        let type_id = self
            .get_room_type_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rt = self
            .get_room_type(&type_id)
            .ok_or(EngineError::NotFound(type_id))?;
        let guard = rt.write_owned().await;
        Ok((type_id, guard))
    }
}

/// Extract the room-type id from a single-room-type event.
fn event_room_type_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RoomAdded { room_type_id, .. }
        | Event::RoomRemoved { room_type_id, .. }
        | Event::RoomStatusChanged { room_type_id, .. } => Some(*room_type_id),
        Event::RoomTypeUpdated { id, .. } => Some(*id),
        Event::RoomTypeCreated { .. }
        | Event::RoomTypeDeleted { .. }
        | Event::ReservationCommitted { .. }
        | Event::BookingsDeleted { .. } => None,
    }
}
