use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that releases rooms whose last booking has checked out.
/// Booking creation marks rooms OCCUPIED; this sweep is the return path to
/// FREE once no booking covers today or any later night. MAINTAINED rooms
/// are never touched — only an explicit status update clears maintenance.
pub async fn run_housekeeping(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(HOUSEKEEPING_INTERVAL);
    loop {
        interval.tick().await;
        let today = chrono::Utc::now().date_naive();
        match engine.release_checked_out_rooms(today).await {
            Ok(0) => {}
            Ok(n) => info!("housekeeping released {n} checked-out rooms"),
            Err(e) => warn!("housekeeping sweep failed: {e}"),
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
