use std::collections::HashSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

// ── Availability Resolver ────────────────────────────────────────
//
// Pure functions over a RoomTypeState snapshot. Nothing here mutates; the
// orchestrator in mutations.rs decides whether to hold a write lock around
// these calls (reservation commit) or a read lock (availability queries).

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

/// Reject stays that are inverted, absurdly long, or too far out.
pub(crate) fn validate_stay(stay: &StayRange) -> Result<(), EngineError> {
    if stay.check_in >= stay.check_out {
        return Err(EngineError::InvalidArgument("check_in must be before check_out"));
    }
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    if (stay.check_in - today()).num_days() > MAX_BOOKING_HORIZON_DAYS {
        return Err(EngineError::LimitExceeded("check_in too far in the future"));
    }
    Ok(())
}

/// Room ids of this type holding a booking that overlaps `stay`.
pub fn booked_room_ids(rt: &RoomTypeState, stay: &StayRange) -> HashSet<Ulid> {
    rt.overlapping(stay).map(|b| b.room_id).collect()
}

/// Room ids of this type free over `stay`: not MAINTAINED and not in the
/// booked set. Ascending room id, so allocation is deterministic.
///
/// OCCUPIED rooms stay eligible — occupancy is a point-in-time fact about
/// today, while the overlap test already excludes every room that is taken
/// for any night of the requested stay.
pub fn available_room_ids(rt: &RoomTypeState, stay: &StayRange, limit: Option<usize>) -> Vec<Ulid> {
    let booked = booked_room_ids(rt, stay);
    let mut free: Vec<Ulid> = Vec::new();
    for room in &rt.rooms {
        if room.status == RoomStatus::Maintained || booked.contains(&room.id) {
            continue;
        }
        free.push(room.id);
        if let Some(limit) = limit
            && free.len() >= limit {
                break;
            }
    }
    free
}

/// Select exactly `count` free rooms for the stay, or report how many were
/// actually free. Read-only: committing the selection is the caller's job,
/// under the caller's lock.
pub fn allocate(
    rt: &RoomTypeState,
    stay: &StayRange,
    count: u32,
) -> Result<Vec<Ulid>, EngineError> {
    allocate_excluding(rt, stay, count, &HashSet::new())
}

/// `allocate`, minus rooms already claimed by earlier lines of the same
/// reservation. Keeps a request with duplicate room-type lines from
/// assigning one room twice.
pub fn allocate_excluding(
    rt: &RoomTypeState,
    stay: &StayRange,
    count: u32,
    claimed: &HashSet<Ulid>,
) -> Result<Vec<Ulid>, EngineError> {
    if count == 0 {
        return Err(EngineError::InvalidArgument("room count must be positive"));
    }
    let mut free = available_room_ids(rt, stay, None);
    free.retain(|id| !claimed.contains(id));

    if free.len() < count as usize {
        return Err(EngineError::InsufficientAvailability {
            room_type_id: rt.id,
            requested: count,
            available: free.len() as u32,
        });
    }
    free.truncate(count as usize);
    Ok(free)
}

/// Free/total room counts over a stay — the search fan-out projection.
pub fn occupancy(rt: &RoomTypeState, stay: &StayRange) -> OccupancyInfo {
    OccupancyInfo {
        room_type_id: rt.id,
        total_rooms: rt.rooms.len() as u32,
        free_rooms: available_room_ids(rt, stay, None).len() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn stay(a: NaiveDate, b: NaiveDate) -> StayRange {
        StayRange::new(a, b)
    }

    fn room_type_with_rooms(n: usize) -> (RoomTypeState, Vec<Ulid>) {
        let mut rt = RoomTypeState::new(Ulid::new(), Ulid::new(), Some("deluxe".into()));
        for i in 0..n {
            rt.insert_room(Room {
                id: Ulid::new(),
                name: format!("{}", 100 + i),
                status: RoomStatus::Free,
            });
        }
        let ids = rt.rooms.iter().map(|r| r.id).collect();
        (rt, ids)
    }

    fn add_booking(rt: &mut RoomTypeState, room_id: Ulid, a: NaiveDate, b: NaiveDate) {
        rt.insert_booking(Booking {
            id: Ulid::new(),
            stay: StayRange::new(a, b),
            total_minor: 0,
            room_id,
            user_id: Ulid::new(),
            created_at: 0,
            updated_at: 0,
        });
    }

    #[test]
    fn all_rooms_free_allocates_requested_count() {
        // Scenario: three FREE rooms, no bookings, ask for two.
        let (rt, ids) = room_type_with_rooms(3);
        let got = allocate(&rt, &stay(d(2024, 6, 1), d(2024, 6, 3)), 2).unwrap();
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|id| ids.contains(id)));
        assert!(got[0] < got[1]); // ascending id
    }

    #[test]
    fn overlapping_booking_excludes_room() {
        // Scenario: R1 booked [06-01, 06-05); query [06-02, 06-04) sees 2 free.
        let (mut rt, ids) = room_type_with_rooms(3);
        add_booking(&mut rt, ids[0], d(2024, 6, 1), d(2024, 6, 5));

        let q = stay(d(2024, 6, 2), d(2024, 6, 4));
        let free = available_room_ids(&rt, &q, None);
        assert_eq!(free, vec![ids[1], ids[2]]);

        let err = allocate(&rt, &q, 3).unwrap_err();
        assert_eq!(
            err,
            EngineError::InsufficientAvailability {
                room_type_id: rt.id,
                requested: 3,
                available: 2,
            }
        );
    }

    #[test]
    fn back_to_back_stay_does_not_block() {
        let (mut rt, ids) = room_type_with_rooms(1);
        add_booking(&mut rt, ids[0], d(2024, 6, 1), d(2024, 6, 3));
        // New stay starts the day the old one checks out
        let got = allocate(&rt, &stay(d(2024, 6, 3), d(2024, 6, 5)), 1).unwrap();
        assert_eq!(got, vec![ids[0]]);
    }

    #[test]
    fn single_night_overlap_blocks() {
        let (mut rt, ids) = room_type_with_rooms(1);
        add_booking(&mut rt, ids[0], d(2024, 6, 1), d(2024, 6, 3));
        // Shares exactly the night of 06-02
        let err = allocate(&rt, &stay(d(2024, 6, 2), d(2024, 6, 4)), 1).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientAvailability { available: 0, .. }));
    }

    #[test]
    fn maintained_room_never_allocated() {
        let (mut rt, ids) = room_type_with_rooms(2);
        rt.set_status(&[ids[0]], RoomStatus::Maintained);
        let free = available_room_ids(&rt, &stay(d(2024, 6, 1), d(2024, 6, 2)), None);
        assert_eq!(free, vec![ids[1]]);
    }

    #[test]
    fn occupied_room_allocatable_for_disjoint_stay() {
        // Room occupied today but with no booking next month.
        let (mut rt, ids) = room_type_with_rooms(1);
        rt.set_status(&[ids[0]], RoomStatus::Occupied);
        add_booking(&mut rt, ids[0], d(2024, 6, 1), d(2024, 6, 3));

        let got = allocate(&rt, &stay(d(2024, 7, 1), d(2024, 7, 3)), 1).unwrap();
        assert_eq!(got, vec![ids[0]]);
    }

    #[test]
    fn allocate_is_read_only_and_repeatable() {
        let (mut rt, ids) = room_type_with_rooms(3);
        add_booking(&mut rt, ids[1], d(2024, 6, 1), d(2024, 6, 9));

        let q = stay(d(2024, 6, 2), d(2024, 6, 4));
        let first = allocate(&rt, &q, 2).unwrap();
        let second = allocate(&rt, &q, 2).unwrap();
        assert_eq!(first, second);
        assert!(rt.bookings.len() == 1);
    }

    #[test]
    fn zero_count_rejected() {
        let (rt, _) = room_type_with_rooms(1);
        let err = allocate(&rt, &stay(d(2024, 6, 1), d(2024, 6, 2)), 0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn claimed_rooms_excluded_for_later_lines() {
        let (rt, ids) = room_type_with_rooms(3);
        let q = stay(d(2024, 6, 1), d(2024, 6, 3));

        let mut claimed = HashSet::new();
        claimed.extend(allocate_excluding(&rt, &q, 2, &claimed).unwrap());
        let rest = allocate_excluding(&rt, &q, 1, &claimed).unwrap();
        assert_eq!(rest, vec![ids[2]]);

        let err = allocate_excluding(&rt, &q, 1, &ids.iter().copied().collect()).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientAvailability { .. }));
    }

    #[test]
    fn limit_caps_candidate_list() {
        let (rt, ids) = room_type_with_rooms(5);
        let free = available_room_ids(&rt, &stay(d(2024, 6, 1), d(2024, 6, 2)), Some(2));
        assert_eq!(free, vec![ids[0], ids[1]]);
    }

    #[test]
    fn occupancy_counts() {
        let (mut rt, ids) = room_type_with_rooms(4);
        rt.set_status(&[ids[0]], RoomStatus::Maintained);
        add_booking(&mut rt, ids[1], d(2024, 6, 1), d(2024, 6, 5));

        let occ = occupancy(&rt, &stay(d(2024, 6, 2), d(2024, 6, 3)));
        assert_eq!(occ.total_rooms, 4);
        assert_eq!(occ.free_rooms, 2);
    }

    #[test]
    fn validate_stay_rejects_inverted_and_oversized() {
        assert!(matches!(
            validate_stay(&StayRange { check_in: d(2024, 6, 3), check_out: d(2024, 6, 1) }),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_stay(&StayRange { check_in: d(2024, 6, 1), check_out: d(2024, 6, 1) }),
            Err(EngineError::InvalidArgument(_))
        ));
        let far = today() + chrono::Duration::days(MAX_BOOKING_HORIZON_DAYS + 10);
        assert!(matches!(
            validate_stay(&StayRange { check_in: far, check_out: far + chrono::Duration::days(1) }),
            Err(EngineError::LimitExceeded(_))
        ));
    }
}
