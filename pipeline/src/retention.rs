use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pulse_core::{CoreError, RetentionConfig};
use std::sync::Arc;
use storage::{CacheStore, ReportArchive};
use tracing::{debug, info};

/// Something holding dated records that can be pruned against a cutoff.
#[async_trait]
pub trait Prunable: Send + Sync {
    fn label(&self) -> &'static str;

    /// Removes every record dated strictly before `cutoff`, returning how many went.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError>;
}

#[async_trait]
impl Prunable for CacheStore {
    fn label(&self) -> &'static str {
        "cache_entries"
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError> {
        Ok(self.purge_older_than(cutoff).await?)
    }
}

#[async_trait]
impl Prunable for ReportArchive {
    fn label(&self) -> &'static str {
        "reports"
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError> {
        let removed = self.purge_older_than(cutoff).await?;
        Ok(removed as u64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub cutoff: Option<DateTime<Utc>>,
    pub removed: Vec<(&'static str, u64)>,
}

impl RetentionReport {
    pub fn total(&self) -> u64 {
        self.removed.iter().map(|(_, n)| n).sum()
    }

    pub fn is_noop(&self) -> bool {
        self.total() == 0
    }

    pub fn removed_from(&self, label: &str) -> u64 {
        self.removed
            .iter()
            .filter(|(l, _)| *l == label)
            .map(|(_, n)| n)
            .sum()
    }
}

/// Deletes cached data and archived reports older than the horizon.
pub struct RetentionManager {
    horizon: Duration,
    targets: Vec<Arc<dyn Prunable>>,
}

impl RetentionManager {
    pub fn new(horizon: Duration) -> Self {
        Self {
            horizon,
            targets: Vec::new(),
        }
    }

    pub fn from_config(config: &RetentionConfig) -> Self {
        Self::new(Duration::days(i64::from(config.horizon_days)))
    }

    pub fn with_target(mut self, target: Arc<dyn Prunable>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    pub async fn enforce(&self) -> Result<RetentionReport, CoreError> {
        self.enforce_at(Utc::now()).await
    }

    /// Running this twice with the same `now` removes nothing the second time.
    pub async fn enforce_at(&self, now: DateTime<Utc>) -> Result<RetentionReport, CoreError> {
        let cutoff = now - self.horizon;
        let mut report = RetentionReport {
            cutoff: Some(cutoff),
            removed: Vec::with_capacity(self.targets.len()),
        };

        for target in &self.targets {
            let removed = target.prune_before(cutoff).await?;
            debug!("Pruned {} {} older than {}", removed, target.label(), cutoff);
            report.removed.push((target.label(), removed));
        }

        if !report.is_noop() {
            info!(
                "Retention removed {} records older than {}",
                report.total(),
                cutoff
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pulse_core::{Diagnostics, EntryKind, Report, ReportSummary};
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use storage::CacheTtls;
    use uuid::Uuid;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("forum-pulse-retention-{}", Uuid::new_v4()))
    }

    fn empty_report(generated_at: DateTime<Utc>) -> Report {
        Report::new(
            generated_at,
            7,
            BTreeSet::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            ReportSummary::default(),
            Diagnostics::default(),
        )
    }

    #[tokio::test]
    async fn test_old_reports_removed_recent_kept() {
        let dir = scratch_dir();
        let archive = Arc::new(ReportArchive::new(dir.clone()));
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        archive.save(&empty_report(now - Duration::days(31))).await.unwrap();
        archive.save(&empty_report(now - Duration::days(29))).await.unwrap();

        let manager = RetentionManager::new(Duration::days(30)).with_target(archive.clone());
        let report = manager.enforce_at(now).await.unwrap();

        assert_eq!(report.removed_from("reports"), 1);
        let remaining = archive.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].generated_at, now - Duration::days(29));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_enforcement_is_idempotent() {
        let dir = scratch_dir();
        let cache = Arc::new(
            CacheStore::open(&dir.join("cache.db"), CacheTtls::default())
                .await
                .unwrap(),
        );
        let archive = Arc::new(ReportArchive::new(dir.join("reports")));
        let now = Utc::now();

        cache
            .put_at("running", &EntryKind::Posts, Vec::new(), 25, now - Duration::days(40))
            .await
            .unwrap();
        cache
            .put_at("nutrition", &EntryKind::Posts, Vec::new(), 25, now)
            .await
            .unwrap();
        archive.save(&empty_report(now - Duration::days(45))).await.unwrap();

        let manager = RetentionManager::new(Duration::days(30))
            .with_target(cache.clone())
            .with_target(archive);

        let first = manager.enforce_at(now).await.unwrap();
        assert_eq!(first.removed_from("cache_entries"), 1);
        assert_eq!(first.removed_from("reports"), 1);

        let second = manager.enforce_at(now).await.unwrap();
        assert!(second.is_noop());
        assert_eq!(cache.count().await.unwrap(), 1);

        cache.close().await;
        std::fs::remove_dir_all(&dir).ok();
    }
}
