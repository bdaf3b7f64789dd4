#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forum_client::{FetchedItem, ForumFetcher};
use pulse_core::{Category, FetchError, PipelineConfig, ResourceConfig, ResourceHandle};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// In-memory forum: canned listings per resource, or a fixed error.
#[derive(Default)]
pub struct ScriptedForum {
    posts: HashMap<String, Result<Vec<FetchedItem>, FetchError>>,
    comments: HashMap<String, Vec<FetchedItem>>,
    post_calls: HashMap<String, AtomicUsize>,
    comment_calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
}

impl ScriptedForum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_posts(mut self, resource: &str, posts: Vec<FetchedItem>) -> Self {
        self.posts.insert(resource.to_string(), Ok(posts));
        self.post_calls
            .insert(resource.to_string(), AtomicUsize::new(0));
        self
    }

    pub fn with_failure(mut self, resource: &str, error: FetchError) -> Self {
        self.posts.insert(resource.to_string(), Err(error));
        self.post_calls
            .insert(resource.to_string(), AtomicUsize::new(0));
        self
    }

    pub fn with_comments(mut self, post_id: &str, comments: Vec<FetchedItem>) -> Self {
        self.comments.insert(post_id.to_string(), comments);
        self
    }

    pub fn post_calls(&self, resource: &str) -> usize {
        self.post_calls
            .get(resource)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn comment_calls(&self) -> usize {
        self.comment_calls.load(Ordering::SeqCst)
    }

    /// When each external call was made, in call order.
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    fn record_call(&self) {
        self.call_times.lock().unwrap().push(Instant::now());
    }

    pub fn total_calls(&self) -> usize {
        self.post_calls
            .values()
            .map(|c| c.load(Ordering::SeqCst))
            .sum::<usize>()
            + self.comment_calls()
    }
}

#[async_trait]
impl ForumFetcher for ScriptedForum {
    async fn fetch_posts(
        &self,
        resource: &ResourceHandle,
        limit: usize,
        since: DateTime<Utc>,
    ) -> Result<Vec<FetchedItem>, FetchError> {
        self.record_call();
        if let Some(counter) = self.post_calls.get(&resource.name) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        match self.posts.get(&resource.name) {
            Some(Ok(posts)) => Ok(posts
                .iter()
                .filter(|p| p.created_utc >= since.timestamp() as f64)
                .take(limit)
                .cloned()
                .collect()),
            Some(Err(error)) => Err(error.clone()),
            None => Err(FetchError::NotAccessible {
                resource: resource.name.clone(),
            }),
        }
    }

    async fn fetch_comments(
        &self,
        _resource: &ResourceHandle,
        post_id: &str,
        limit: usize,
    ) -> Result<Vec<FetchedItem>, FetchError> {
        self.record_call();
        self.comment_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .comments
            .get(post_id)
            .map(|c| c.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

pub fn post(id: &str, title: &str, hours_ago: i64, score: i64, num_comments: i64) -> FetchedItem {
    FetchedItem {
        id: id.to_string(),
        title: Some(title.to_string()),
        body: None,
        author: Some("someone".to_string()),
        created_utc: (Utc::now().timestamp() - hours_ago * 3600) as f64,
        score,
        num_comments,
        parent_id: None,
    }
}

pub fn comment(id: &str, body: &str, score: i64) -> FetchedItem {
    FetchedItem {
        id: id.to_string(),
        title: None,
        body: Some(body.to_string()),
        author: Some("someone_else".to_string()),
        created_utc: Utc::now().timestamp() as f64,
        score,
        num_comments: 0,
        parent_id: None,
    }
}

pub fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("forum-pulse-pipeline-{}", Uuid::new_v4()))
}

/// Config rooted in `dir`, with backoff short enough for real-time tests.
pub fn test_config(dir: &PathBuf, resources: &[(&str, Category)]) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.resources = resources
        .iter()
        .map(|(name, category)| ResourceConfig {
            name: name.to_string(),
            category: *category,
        })
        .collect();
    config.storage.cache_db = dir.join("cache.db");
    config.storage.reports_dir = dir.join("reports");
    config.rate_limit.max_calls_per_minute = 1000;
    config.rate_limit.initial_backoff_ms = 5;
    config.rate_limit.max_backoff_secs = 1;
    config.collection.fetch_timeout_secs = 5;
    config
}
