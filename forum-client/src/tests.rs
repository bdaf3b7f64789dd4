#[cfg(test)]
mod tests {
    use crate::{
        sanitize_all, FetchFailure, FetchMetrics, FetchedItem, ForumFetcher, RateGovernor,
        RetryExecutor, RetryPolicy,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use pulse_core::{Category, EntryKind, FetchError, ResourceHandle};
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    /// Replays a fixed sequence of post responses.
    struct ScriptedFetcher {
        responses: Mutex<VecDeque<Result<Vec<FetchedItem>, FetchError>>>,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<Result<Vec<FetchedItem>, FetchError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }

        async fn remaining(&self) -> usize {
            self.responses.lock().await.len()
        }
    }

    #[async_trait]
    impl ForumFetcher for ScriptedFetcher {
        async fn fetch_posts(
            &self,
            _resource: &ResourceHandle,
            limit: usize,
            since: DateTime<Utc>,
        ) -> Result<Vec<FetchedItem>, FetchError> {
            let next = self.responses.lock().await.pop_front();
            next.unwrap_or(Ok(Vec::new())).map(|items| {
                items
                    .into_iter()
                    .filter(|i| i.created_utc >= since.timestamp() as f64)
                    .take(limit)
                    .collect()
            })
        }

        async fn fetch_comments(
            &self,
            _resource: &ResourceHandle,
            _post_id: &str,
            _limit: usize,
        ) -> Result<Vec<FetchedItem>, FetchError> {
            Ok(Vec::new())
        }
    }

    fn post(id: &str, age_hours: i64) -> FetchedItem {
        FetchedItem {
            id: id.to_string(),
            title: Some(format!("Post {}", id)),
            body: Some("body text".to_string()),
            author: Some("someone".to_string()),
            created_utc: (Utc::now() - ChronoDuration::hours(age_hours)).timestamp() as f64,
            score: 10,
            num_comments: 2,
            parent_id: None,
        }
    }

    fn setup() -> (RetryExecutor, Arc<FetchMetrics>) {
        let metrics = Arc::new(FetchMetrics::new());
        let executor = RetryExecutor::new(
            RetryPolicy::default(),
            Arc::new(RateGovernor::per_minute(60)),
            metrics.clone(),
        );
        (executor, metrics)
    }

    async fn fetch(
        executor: &RetryExecutor,
        fetcher: &ScriptedFetcher,
        resource: &ResourceHandle,
    ) -> Result<Vec<FetchedItem>, FetchFailure> {
        let since = Utc::now() - ChronoDuration::days(7);
        executor
            .execute(&resource.name, &EntryKind::Posts, || {
                fetcher.fetch_posts(resource, 100, since)
            })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_then_success() {
        let (executor, metrics) = setup();
        let resource = ResourceHandle::new("running", Category::Running);
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchError::RateLimited { retry_after: None }),
            Err(FetchError::RateLimited { retry_after: None }),
            Ok(vec![post("a", 1), post("b", 2)]),
        ]);

        let start = Instant::now();
        let items = fetch(&executor, &fetcher, &resource).await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(fetcher.remaining().await, 0);

        let stats = metrics.snapshot().await;
        assert_eq!(stats.post_fetch_calls, 3);
        assert_eq!(stats.rate_limited, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_is_fatal_without_retry() {
        let (executor, metrics) = setup();
        let resource = ResourceHandle::new("running", Category::Running);
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchError::Unauthorized {
                reason: "bad credentials".to_string(),
            }),
            Ok(vec![post("a", 1)]),
        ]);

        let result = fetch(&executor, &fetcher, &resource).await;
        assert_eq!(
            result,
            Err(FetchFailure::Unauthorized {
                reason: "bad credentials".to_string()
            })
        );
        assert_eq!(fetcher.remaining().await, 1);
        assert_eq!(metrics.snapshot().await.post_fetch_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_posts_filtered_and_sanitized() {
        let (executor, _) = setup();
        let resource = ResourceHandle::new("MachineLearning", Category::AiMl);
        let mut broken = post("", 1);
        broken.id = String::new();
        let fetcher = ScriptedFetcher::new(vec![Ok(vec![
            post("fresh", 5),
            post("stale", 24 * 30),
            broken,
        ])]);

        let fetched = fetch(&executor, &fetcher, &resource).await.unwrap();
        let (items, malformed) = sanitize_all(fetched);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_id, "fresh");
        assert_eq!(malformed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_governor_shared_across_resources() {
        let metrics = Arc::new(FetchMetrics::new());
        let governor = Arc::new(RateGovernor::per_minute(2));
        let executor = RetryExecutor::new(RetryPolicy::default(), governor.clone(), metrics);
        let fetcher = ScriptedFetcher::new(Vec::new());

        let start = Instant::now();
        for name in ["running", "nutrition", "fitness"] {
            let resource = ResourceHandle::new(name, Category::Running);
            fetch(&executor, &fetcher, &resource).await.unwrap();
        }

        // Third call waits for the first to leave the window.
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(governor.status().await.calls_in_window, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_fetches_never_exceed_calls_per_minute() {
        let metrics = Arc::new(FetchMetrics::new());
        let executor = RetryExecutor::new(
            RetryPolicy::default(),
            Arc::new(RateGovernor::per_minute(2)),
            metrics.clone(),
        );
        let calls = Mutex::new(Vec::new());
        let start = Instant::now();

        let fetch = |name: &'static str| {
            let executor = &executor;
            let calls = &calls;
            async move {
                executor
                    .execute(name, &EntryKind::Posts, move || async move {
                        calls.lock().await.push(Instant::now());
                        Ok::<_, FetchError>(name)
                    })
                    .await
            }
        };

        let results = tokio::join!(
            fetch("ai"),
            fetch("nutrition"),
            fetch("running"),
            fetch("weightroom")
        );
        assert_eq!(results.0, Ok("ai"));
        assert_eq!(results.3, Ok("weightroom"));

        let mut calls = calls.into_inner();
        calls.sort();
        assert_eq!(calls.len(), 4);
        for trio in calls.windows(3) {
            assert!(trio[2].duration_since(trio[0]) >= Duration::from_secs(60));
        }
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(metrics.snapshot().await.post_fetch_calls, 4);
    }
}
