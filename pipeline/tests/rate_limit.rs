mod common;

use common::{post, scratch_dir, test_config, ScriptedForum};
use forum_client::{FetchMetrics, GovernorConfig, RateGovernor, RetryPolicy};
use pipeline::{CollectOptions, Collector, PipelineContext};
use pulse_core::Category;
use std::sync::Arc;
use std::time::Duration;
use storage::{CacheStore, CacheTtls};

const WINDOW: Duration = Duration::from_millis(400);
// Gap between the governor stamping a call and the fetcher seeing it.
const SLACK: Duration = Duration::from_millis(50);

// Runs on the real clock: a paused clock would auto-advance past sqlx's pool
// timeouts while the SQLite worker thread is busy.
#[tokio::test]
async fn test_parallel_collection_shares_one_call_window() {
    let dir = scratch_dir();
    let resources = [
        ("machinelearning", Category::AiMl),
        ("nutrition", Category::Nutrition),
        ("running", Category::Running),
        ("weightroom", Category::StrengthTraining),
    ];
    let config = test_config(&dir, &resources);

    let mut forum = ScriptedForum::new();
    for (i, (name, _)) in resources.iter().enumerate() {
        forum = forum.with_posts(
            name,
            vec![post(&format!("{}-{}", name, i), "Weekly check in", 1, 10, 0)],
        );
    }
    let forum = Arc::new(forum);

    let governor = Arc::new(RateGovernor::new(GovernorConfig {
        max_calls: 2,
        window: WINDOW,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_secs(1),
    }));
    let cache = Arc::new(
        CacheStore::open(&config.storage.cache_db, CacheTtls::default())
            .await
            .unwrap(),
    );
    let context = PipelineContext::new(
        governor,
        cache.clone(),
        Arc::new(FetchMetrics::new()),
        RetryPolicy::from(&config.collection),
    );
    let collector = Collector::new(context, forum.clone());
    let options = CollectOptions {
        concurrency: 4,
        include_comments: false,
        ..CollectOptions::from(&config.collection)
    };

    let collection = collector
        .collect(&config.resource_handles(), &options)
        .await
        .unwrap();
    assert_eq!(collection.collected_count(), 4);

    let mut calls = forum.call_times();
    calls.sort();
    assert_eq!(calls.len(), 4);
    // Any three calls must span at least one full window.
    for trio in calls.windows(3) {
        assert!(trio[2].duration_since(trio[0]) + SLACK >= WINDOW);
    }

    cache.close().await;
    std::fs::remove_dir_all(&dir).ok();
}
