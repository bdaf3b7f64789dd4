use crate::context::PipelineContext;
use chrono::{DateTime, Duration, Utc};
use forum_client::{sanitize_all, FetchFailure, ForumFetcher, RetryExecutor};
use futures::stream::{self, StreamExt, TryStreamExt};
use pulse_core::{
    CollectionConfig, CoreError, EntryKind, ErrorExt, FetchError, ItemsByResource, RawItem,
    ResourceHandle, ResourceOutcome, ResourceStatus,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-run collection limits.
#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub max_items_per_resource: usize,
    pub period_days: u32,
    pub include_comments: bool,
    pub comment_limit: usize,
    pub concurrency: usize,
}

impl From<&CollectionConfig> for CollectOptions {
    fn from(config: &CollectionConfig) -> Self {
        Self {
            max_items_per_resource: config.max_items_per_resource,
            period_days: config.period_days,
            include_comments: config.include_comments,
            comment_limit: config.comment_limit,
            concurrency: config.concurrency,
        }
    }
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self::from(&CollectionConfig::default())
    }
}

/// What a collect pass produced. Resources that were skipped appear in
/// `outcomes` but not in `items`.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub items: ItemsByResource,
    pub outcomes: Vec<ResourceOutcome>,
    pub malformed_items: usize,
}

impl Collection {
    pub fn collected_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_collected()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.collected_count()
    }
}

struct ResourceResult {
    outcome: ResourceOutcome,
    items: Option<Vec<RawItem>>,
}

/// Items for one key, and whether they came from the cache.
struct Batch {
    items: Vec<RawItem>,
    from_cache: bool,
    malformed: usize,
}

/// Fetch-or-reuse orchestration over the configured resources.
pub struct Collector {
    context: PipelineContext,
    fetcher: Arc<dyn ForumFetcher>,
    executor: RetryExecutor,
}

impl Collector {
    pub fn new(context: PipelineContext, fetcher: Arc<dyn ForumFetcher>) -> Self {
        let executor = context.executor();
        Self {
            context,
            fetcher,
            executor,
        }
    }

    /// Collects every resource, in name order, `options.concurrency` at a time.
    ///
    /// A resource that cannot be reached is skipped and recorded; only a
    /// storage failure or rejected credentials abort the pass.
    pub async fn collect(
        &self,
        resources: &[ResourceHandle],
        options: &CollectOptions,
    ) -> Result<Collection, CoreError> {
        let since = Utc::now() - Duration::days(i64::from(options.period_days));

        let mut ordered: Vec<&ResourceHandle> = resources.iter().collect();
        ordered.sort_by(|a, b| a.name.cmp(&b.name));
        ordered.dedup_by(|a, b| a.name == b.name);

        info!(
            "Collecting {} resources (concurrency {})",
            ordered.len(),
            options.concurrency
        );

        let results: Vec<ResourceResult> = stream::iter(ordered)
            .map(|resource| self.collect_resource(resource, options, since))
            .buffered(options.concurrency.max(1))
            .try_collect()
            .await?;

        let mut collection = Collection::default();
        for result in results {
            collection.malformed_items += result.outcome.malformed_items;
            if let Some(items) = result.items {
                collection
                    .items
                    .insert(result.outcome.resource.clone(), items);
            }
            collection.outcomes.push(result.outcome);
        }

        info!(
            "Collection finished: {} collected, {} skipped",
            collection.collected_count(),
            collection.failed_count()
        );
        Ok(collection)
    }

    async fn collect_resource(
        &self,
        resource: &ResourceHandle,
        options: &CollectOptions,
        since: DateTime<Utc>,
    ) -> Result<ResourceResult, CoreError> {
        let posts = match self.posts(resource, options, since).await? {
            Ok(batch) => batch,
            Err(failure) => return self.skipped(resource, failure).await,
        };

        let mut items = posts.items;
        let post_count = items.len();
        let mut malformed = posts.malformed;
        let mut comment_failures = 0;

        if options.include_comments && options.comment_limit > 0 {
            let post_ids: Vec<String> = items
                .iter()
                .filter(|post| post.child_count > 0)
                .map(|post| post.item_id.clone())
                .collect();

            for post_id in post_ids {
                match self
                    .comments(resource, &post_id, options.comment_limit)
                    .await?
                {
                    Ok(batch) => {
                        malformed += batch.malformed;
                        items.extend(batch.items);
                    }
                    Err(failure) => {
                        warn!(
                            "Skipping comments of {} in {}: {:?}",
                            post_id, resource, failure
                        );
                        comment_failures += 1;
                    }
                }
            }
        }

        let comment_count = items.len() - post_count;
        info!(
            "Collected {} posts{} and {} comments from {}",
            post_count,
            if posts.from_cache { " (cached)" } else { "" },
            comment_count,
            resource
        );

        Ok(ResourceResult {
            outcome: ResourceOutcome {
                resource: resource.name.clone(),
                category: resource.category,
                status: ResourceStatus::Collected {
                    posts: post_count,
                    comments: comment_count,
                    posts_from_cache: posts.from_cache,
                    comment_failures,
                },
                malformed_items: malformed,
            },
            items: Some(items),
        })
    }

    /// Outer error: fatal for the run. Inner error: this resource is skipped.
    async fn posts(
        &self,
        resource: &ResourceHandle,
        options: &CollectOptions,
        since: DateTime<Utc>,
    ) -> Result<Result<Batch, FetchFailure>, CoreError> {
        let kind = EntryKind::Posts;
        let limit = options.max_items_per_resource;

        if let Some(entry) = self.context.cache().get(&resource.name, &kind).await? {
            if entry.covers(limit) {
                self.context.metrics().record_cache_hit().await;
                let items = entry
                    .items
                    .into_iter()
                    .filter(|item| item.created_at >= since)
                    .take(limit)
                    .collect();
                return Ok(Ok(Batch {
                    items,
                    from_cache: true,
                    malformed: 0,
                }));
            }
            debug!(
                "Cached posts for {} cover {} items, {} requested",
                resource, entry.requested_limit, limit
            );
        }
        self.context.metrics().record_cache_miss().await;

        let fetcher = self.fetcher.as_ref();
        let fetched = self
            .executor
            .execute(&resource.name, &kind, move || {
                fetcher.fetch_posts(resource, limit, since)
            })
            .await;

        match fetched {
            Ok(raw) => {
                let (mut items, malformed) = sanitize_all(raw);
                items.truncate(limit);
                let entry = self
                    .context
                    .cache()
                    .put(&resource.name, &kind, items, limit)
                    .await?;
                Ok(Ok(Batch {
                    items: entry.items,
                    from_cache: false,
                    malformed,
                }))
            }
            Err(failure) => fatal_or_skip(failure),
        }
    }

    async fn comments(
        &self,
        resource: &ResourceHandle,
        post_id: &str,
        limit: usize,
    ) -> Result<Result<Batch, FetchFailure>, CoreError> {
        let kind = EntryKind::comments(post_id);

        if let Some(entry) = self.context.cache().get(&resource.name, &kind).await? {
            if entry.covers(limit) {
                self.context.metrics().record_cache_hit().await;
                let mut items = entry.items;
                items.truncate(limit);
                return Ok(Ok(Batch {
                    items,
                    from_cache: true,
                    malformed: 0,
                }));
            }
        }
        self.context.metrics().record_cache_miss().await;

        let fetcher = self.fetcher.as_ref();
        let fetched = self
            .executor
            .execute(&resource.name, &kind, move || {
                fetcher.fetch_comments(resource, post_id, limit)
            })
            .await;

        match fetched {
            Ok(raw) => {
                let (mut items, malformed) = sanitize_all(raw);
                items.truncate(limit);
                for comment in &mut items {
                    if comment.parent_item_id.is_none() {
                        comment.parent_item_id = Some(post_id.to_string());
                    }
                }
                let entry = self
                    .context
                    .cache()
                    .put(&resource.name, &kind, items, limit)
                    .await?;
                Ok(Ok(Batch {
                    items: entry.items,
                    from_cache: false,
                    malformed,
                }))
            }
            Err(failure) => fatal_or_skip(failure),
        }
    }

    async fn skipped(
        &self,
        resource: &ResourceHandle,
        failure: FetchFailure,
    ) -> Result<ResourceResult, CoreError> {
        self.context.metrics().record_skipped_resource().await;

        let status = match failure {
            FetchFailure::NotAccessible => {
                warn!("{} is not accessible, skipping for this run", resource);
                ResourceStatus::NotAccessible
            }
            FetchFailure::Exhausted {
                attempts,
                last_error,
            } => {
                warn!("Giving up on {} after {} attempts", resource, attempts);
                last_error.log_warn();
                ResourceStatus::Failed {
                    attempts,
                    reason: last_error.to_string(),
                }
            }
            FetchFailure::Unauthorized { reason } => {
                return Err(FetchError::Unauthorized { reason }.into());
            }
        };

        Ok(ResourceResult {
            outcome: ResourceOutcome {
                resource: resource.name.clone(),
                category: resource.category,
                status,
                malformed_items: 0,
            },
            items: None,
        })
    }
}

/// Rejected credentials end the run; anything else only skips the key.
fn fatal_or_skip(failure: FetchFailure) -> Result<Result<Batch, FetchFailure>, CoreError> {
    match failure {
        FetchFailure::Unauthorized { reason } => Err(FetchError::Unauthorized { reason }.into()),
        other => Ok(Err(other)),
    }
}
