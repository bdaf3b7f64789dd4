use forum_client::{FetchMetrics, GovernorConfig, RateGovernor, RetryExecutor, RetryPolicy};
use pulse_core::{CoreError, PipelineConfig};
use std::sync::Arc;
use storage::{CacheStore, CacheTtls};

/// Shared state of one pipeline: the single rate governor, the cache and the
/// fetch counters. Every collection branch works through the same instances.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    governor: Arc<RateGovernor>,
    cache: Arc<CacheStore>,
    metrics: Arc<FetchMetrics>,
    retry_policy: RetryPolicy,
}

impl PipelineContext {
    pub fn new(
        governor: Arc<RateGovernor>,
        cache: Arc<CacheStore>,
        metrics: Arc<FetchMetrics>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            governor,
            cache,
            metrics,
            retry_policy,
        }
    }

    /// Opens the cache and builds the governor described by `config`.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self, CoreError> {
        let cache = CacheStore::open(
            &config.storage.cache_db,
            CacheTtls::from(&config.cache),
        )
        .await?;

        Ok(Self::new(
            Arc::new(RateGovernor::new(GovernorConfig::from(&config.rate_limit))),
            Arc::new(cache),
            Arc::new(FetchMetrics::new()),
            RetryPolicy::from(&config.collection),
        ))
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<FetchMetrics> {
        &self.metrics
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// A retry executor bound to this context's governor and metrics.
    pub fn executor(&self) -> RetryExecutor {
        RetryExecutor::new(
            self.retry_policy.clone(),
            Arc::clone(&self.governor),
            Arc::clone(&self.metrics),
        )
    }
}
