//! The fetch capability the collector drives, and the boundary where fetched
//! items lose their author identity.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use pulse_core::{FetchError, RawItem, ResourceHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An item as returned by a forum, before anonymisation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchedItem {
    pub id: String,
    pub title: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
    pub created_utc: f64,
    pub score: i64,
    pub num_comments: i64,
    pub parent_id: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedItem {
    #[error("item has no id")]
    MissingId,

    #[error("item {id} has an invalid timestamp")]
    InvalidTimestamp { id: String },

    #[error("item {id} has a negative comment count")]
    NegativeChildCount { id: String },
}

const REMOVED_MARKERS: [&str; 2] = ["[deleted]", "[removed]"];

impl FetchedItem {
    /// Converts to a [`RawItem`], dropping the author.
    ///
    /// Negative scores clamp to zero; removed bodies become empty.
    pub fn sanitize(self) -> Result<RawItem, MalformedItem> {
        if self.id.trim().is_empty() {
            return Err(MalformedItem::MissingId);
        }
        if self.num_comments < 0 {
            return Err(MalformedItem::NegativeChildCount { id: self.id });
        }

        let created_at = timestamp(self.created_utc)
            .ok_or_else(|| MalformedItem::InvalidTimestamp { id: self.id.clone() })?;

        let text_body = self
            .body
            .filter(|b| !REMOVED_MARKERS.contains(&b.trim()))
            .unwrap_or_default();

        Ok(RawItem {
            item_id: self.id,
            text_title: self.title.filter(|t| !t.is_empty()),
            text_body,
            created_at,
            upvote_count: self.score.max(0) as u64,
            child_count: self.num_comments as u64,
            parent_item_id: self.parent_id,
        })
    }
}

fn timestamp(created_utc: f64) -> Option<DateTime<Utc>> {
    if !created_utc.is_finite() || created_utc < 0.0 {
        return None;
    }
    Utc.timestamp_millis_opt((created_utc * 1000.0) as i64).single()
}

/// Sanitizes a batch, returning the clean items and how many were malformed.
pub fn sanitize_all(items: Vec<FetchedItem>) -> (Vec<RawItem>, usize) {
    let mut clean = Vec::with_capacity(items.len());
    let mut malformed = 0;

    for item in items {
        match item.sanitize() {
            Ok(raw) => clean.push(raw),
            Err(reason) => {
                tracing::debug!("Skipping malformed item: {}", reason);
                malformed += 1;
            }
        }
    }

    (clean, malformed)
}

/// Remote forum access.
///
/// Implementations report `RateLimited`, `Transient`/`Timeout`, `NotAccessible`
/// or `Unauthorized`; pacing and retries are the caller's job.
#[async_trait]
pub trait ForumFetcher: Send + Sync {
    /// Up to `limit` posts created at or after `since`.
    async fn fetch_posts(
        &self,
        resource: &ResourceHandle,
        limit: usize,
        since: DateTime<Utc>,
    ) -> Result<Vec<FetchedItem>, FetchError>;

    /// Up to `limit` top-level comments of `post_id`.
    async fn fetch_comments(
        &self,
        resource: &ResourceHandle,
        post_id: &str,
        limit: usize,
    ) -> Result<Vec<FetchedItem>, FetchError>;
}
