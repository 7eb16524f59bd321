use ulid::Ulid;

/// Typed outcomes from the booking engine. Business outcomes
/// (`InsufficientAvailability`, `Conflict`) are distinct from
/// infrastructure failures (`WalError`) so callers can tell a full hotel
/// from a broken disk. User-facing text is rendered at the wire boundary,
/// never here.
#[derive(Debug, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidArgument(&'static str),
    /// Fewer free rooms than requested for a room type over the stay.
    /// A normal business outcome — the caller may retry with fewer rooms
    /// or different dates.
    InsufficientAvailability {
        room_type_id: Ulid,
        requested: u32,
        available: u32,
    },
    /// Commit-time re-validation failed (e.g. a room acquired an
    /// overlapping booking between validation and apply). Retryable.
    Conflict(Ulid),
    /// Room type still has rooms registered and cannot be deleted.
    HasRooms(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// True for outcomes a client may meaningfully retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            EngineError::InsufficientAvailability {
                room_type_id,
                requested,
                available,
            } => write!(
                f,
                "insufficient availability for room type {room_type_id}: requested {requested}, available {available}"
            ),
            EngineError::Conflict(id) => write!(f, "conflict on room {id}"),
            EngineError::HasRooms(id) => {
                write!(f, "cannot delete room type {id}: rooms still registered")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
