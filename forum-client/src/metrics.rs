use pulse_core::{EntryKind, FetchError, FetchStats};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Counters shared by every collection branch of a run.
#[derive(Debug)]
pub struct FetchMetrics {
    stats: Arc<RwLock<FetchStats>>,
}

impl FetchMetrics {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(RwLock::new(FetchStats::default())),
        }
    }

    pub async fn record_call(&self, kind: &EntryKind) {
        let mut stats = self.stats.write().await;
        match kind {
            EntryKind::Posts => stats.post_fetch_calls += 1,
            EntryKind::Comments { .. } => stats.comment_fetch_calls += 1,
        }
    }

    pub async fn record_error(&self, error: &FetchError) {
        let mut stats = self.stats.write().await;
        match error {
            FetchError::RateLimited { .. } => stats.rate_limited += 1,
            FetchError::Transient { .. }
            | FetchError::Timeout { .. }
            | FetchError::InvalidResponse { .. } => stats.transient_failures += 1,
            FetchError::NotAccessible { .. } | FetchError::Unauthorized { .. } => {}
        }
    }

    pub async fn record_cache_hit(&self) {
        self.stats.write().await.cache_hits += 1;
    }

    pub async fn record_cache_miss(&self) {
        self.stats.write().await.cache_misses += 1;
    }

    pub async fn record_skipped_resource(&self) {
        self.stats.write().await.skipped_resources += 1;
    }

    pub async fn snapshot(&self) -> FetchStats {
        self.stats.read().await.clone()
    }

    pub async fn reset(&self) {
        let mut stats = self.stats.write().await;
        *stats = FetchStats::default();
    }
}

impl Default for FetchMetrics {
    fn default() -> Self {
        Self::new()
    }
}
