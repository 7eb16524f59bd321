//! Hard caps on every client-controlled input. All of these are generous for
//! a real property and exist to keep a misbehaving client from exhausting
//! memory or the WAL.

/// Max room types a single tenant may create.
pub const MAX_ROOM_TYPES_PER_TENANT: usize = 100_000;

/// Max rooms registered under one room type.
pub const MAX_ROOMS_PER_TYPE: usize = 10_000;

/// Max booking rows held on one room type, past stays included.
pub const MAX_BOOKINGS_PER_TYPE: usize = 100_000;

/// Max rooms committed by a single reservation across all its room types.
pub const MAX_ROOMS_PER_RESERVATION: usize = 100;

/// Max room-type lines in one reservation request.
pub const MAX_LINES_PER_RESERVATION: usize = 20;

/// Max ids in one bulk delete / status update / IN clause.
pub const MAX_IN_CLAUSE_IDS: usize = 1_000;

/// Max nights in a single stay.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// How far into the future a check-in may be, in days.
pub const MAX_BOOKING_HORIZON_DAYS: i64 = 3_650;

/// Max length of room / room-type names.
pub const MAX_NAME_LEN: usize = 256;

/// Max concurrently loaded tenants.
pub const MAX_TENANTS: usize = 1_024;

/// Max tenant (database) name length.
pub const MAX_TENANT_NAME_LEN: usize = 256;
