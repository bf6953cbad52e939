use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::idempotency::IdempotencyCache;

/// Periodically drops expired idempotency keys.
pub async fn run_idempotency_sweeper(cache: Arc<IdempotencyCache>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let purged = cache.purge_expired();
        if purged > 0 {
            debug!("purged {purged} expired idempotency keys");
        }
    }
}

/// Periodically compacts the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        maybe_compact(&engine, threshold).await;
    }
}

/// Compact if the WAL has at least `threshold` appends since the last rewrite.
pub async fn maybe_compact(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold.max(1) {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}
