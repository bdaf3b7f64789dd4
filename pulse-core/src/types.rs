use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Topic group a monitored forum belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    AiMl,
    Running,
    Nutrition,
    StrengthTraining,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::AiMl => "ai_ml",
            Category::Running => "running",
            Category::Nutrition => "nutrition",
            Category::StrengthTraining => "strength_training",
        }
    }
}

/// One monitored forum. Created from configuration and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub name: String,
    pub category: Category,
}

impl ResourceHandle {
    pub fn new(name: impl Into<String>, category: Category) -> Self {
        Self {
            name: name.into(),
            category,
        }
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r/{}", self.name)
    }
}

/// What a cache entry holds. Comment entries are scoped to the post they hang off.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    Posts,
    Comments { post_id: String },
}

impl EntryKind {
    pub const POSTS_TTL: Duration = Duration::from_secs(60 * 60);
    pub const COMMENTS_TTL: Duration = Duration::from_secs(30 * 60);

    pub fn comments(post_id: impl Into<String>) -> Self {
        EntryKind::Comments {
            post_id: post_id.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntryKind::Posts => "posts",
            EntryKind::Comments { .. } => "comments",
        }
    }

    /// Post id the entry is scoped to; empty for post listings.
    pub fn scope(&self) -> &str {
        match self {
            EntryKind::Posts => "",
            EntryKind::Comments { post_id } => post_id,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        match self {
            EntryKind::Posts => Self::POSTS_TTL,
            EntryKind::Comments { .. } => Self::COMMENTS_TTL,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Posts => write!(f, "posts"),
            EntryKind::Comments { post_id } => write!(f, "comments:{}", post_id),
        }
    }
}

/// One fetched post or top-level comment.
///
/// Carries no author identity: items are anonymised before they reach the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub item_id: String,
    pub text_title: Option<String>,
    pub text_body: String,
    pub created_at: DateTime<Utc>,
    pub upvote_count: u64,
    pub child_count: u64,
    pub parent_item_id: Option<String>,
}

impl RawItem {
    /// Title and body joined for text analysis.
    pub fn text(&self) -> String {
        match &self.text_title {
            Some(title) if !title.is_empty() => format!("{}\n{}", title, self.text_body),
            _ => self.text_body.clone(),
        }
    }

    pub fn has_text(&self) -> bool {
        self.text_title
            .as_deref()
            .map_or(false, |t| !t.trim().is_empty())
            || !self.text_body.trim().is_empty()
    }

    pub fn is_comment(&self) -> bool {
        self.parent_item_id.is_some()
    }

    /// Upvotes plus comments, with comments weighted double.
    pub fn engagement_score(&self) -> u64 {
        self.upvote_count
            .saturating_add(self.child_count.saturating_mul(2))
    }
}

/// Collected items keyed by resource name; posts first, then their comments.
pub type ItemsByResource = BTreeMap<String, Vec<RawItem>>;

/// Snapshot of items fetched for one (resource, kind) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub resource: String,
    pub kind: EntryKind,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
    /// Item budget the fetch was made with; a short listing still satisfies it.
    pub requested_limit: usize,
    pub items: Vec<RawItem>,
}

impl CacheEntry {
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.fetched_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }

    /// Whether this entry can answer a request for `limit` items.
    pub fn covers(&self, limit: usize) -> bool {
        self.items.len() >= limit || self.requested_limit >= limit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Stable,
    Declining,
}

/// Anonymised pointer to an item that backs a trend or question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReference {
    pub resource: String,
    pub item_id: String,
    pub title: Option<String>,
    pub upvote_count: u64,
    pub child_count: u64,
}

impl ItemReference {
    pub fn new(resource: &str, item: &RawItem) -> Self {
        Self {
            resource: resource.to_string(),
            item_id: item.item_id.clone(),
            title: item.text_title.clone(),
            upvote_count: item.upvote_count,
            child_count: item.child_count,
        }
    }

    pub fn engagement_score(&self) -> u64 {
        self.upvote_count
            .saturating_add(self.child_count.saturating_mul(2))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRecord {
    pub term: String,
    pub frequency: u32,
    pub direction: TrendDirection,
    pub supporting_resources: BTreeSet<String>,
    pub earliest_count: u32,
    pub recent_count: u32,
    /// Term occurrences over all term occurrences in the earliest window.
    pub earliest_share: f64,
    pub recent_share: f64,
    /// Highest-engagement items mentioning the term, at most five.
    pub top_items: Vec<ItemReference>,
}

impl TrendRecord {
    /// Change of the recent-window share relative to the earliest-window share.
    ///
    /// `None` when the term never appeared in the earliest window.
    pub fn relative_change(&self) -> Option<f64> {
        if self.earliest_share == 0.0 {
            return None;
        }
        Some((self.recent_share - self.earliest_share) / self.earliest_share)
    }
}

/// Mean upvotes and comment counts over every occurrence of a question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AverageEngagement {
    pub avg_upvotes: f64,
    pub avg_comments: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub term: String,
    pub frequency: u32,
    pub example_resource: String,
    pub example_item_id: String,
    pub resources: BTreeSet<String>,
    pub avg_engagement: AverageEngagement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedItem {
    pub resource: String,
    pub score: u64,
    pub item: RawItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceStatus {
    Collected {
        posts: usize,
        comments: usize,
        posts_from_cache: bool,
        comment_failures: usize,
    },
    NotAccessible,
    Failed { attempts: u32, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub resource: String,
    pub category: Category,
    pub status: ResourceStatus,
    pub malformed_items: usize,
}

impl ResourceOutcome {
    pub fn is_collected(&self) -> bool {
        matches!(self.status, ResourceStatus::Collected { .. })
    }

    pub fn item_count(&self) -> usize {
        match &self.status {
            ResourceStatus::Collected {
                posts, comments, ..
            } => posts + comments,
            _ => 0,
        }
    }
}

/// Counters gathered while collecting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchStats {
    pub post_fetch_calls: u64,
    pub comment_fetch_calls: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rate_limited: u64,
    pub transient_failures: u64,
    pub skipped_resources: u64,
}

impl FetchStats {
    pub fn external_calls(&self) -> u64 {
        self.post_fetch_calls + self.comment_fetch_calls
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub resources: Vec<ResourceOutcome>,
    pub malformed_items: usize,
    pub skipped_question_items: usize,
    pub fetch: FetchStats,
}

impl Diagnostics {
    pub fn failed_resources(&self) -> impl Iterator<Item = &ResourceOutcome> {
        self.resources.iter().filter(|r| !r.is_collected())
    }

    pub fn outcome(&self, resource: &str) -> Option<&ResourceOutcome> {
        self.resources.iter().find(|r| r.resource == resource)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_posts: usize,
    pub total_comments: usize,
    pub resources_analyzed: usize,
}

/// Result of one analysis run. Immutable once assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    id: Uuid,
    generated_at: DateTime<Utc>,
    period_days: u32,
    covering_resources: BTreeSet<String>,
    trend_records: Vec<TrendRecord>,
    question_records: Vec<QuestionRecord>,
    engagement_rankings: Vec<RankedItem>,
    summary: ReportSummary,
    diagnostics: Diagnostics,
}

impl Report {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        generated_at: DateTime<Utc>,
        period_days: u32,
        covering_resources: BTreeSet<String>,
        trend_records: Vec<TrendRecord>,
        question_records: Vec<QuestionRecord>,
        engagement_rankings: Vec<RankedItem>,
        summary: ReportSummary,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            generated_at,
            period_days,
            covering_resources,
            trend_records,
            question_records,
            engagement_rankings,
            summary,
            diagnostics,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn period_days(&self) -> u32 {
        self.period_days
    }

    pub fn covering_resources(&self) -> &BTreeSet<String> {
        &self.covering_resources
    }

    pub fn trend_records(&self) -> &[TrendRecord] {
        &self.trend_records
    }

    pub fn question_records(&self) -> &[QuestionRecord] {
        &self.question_records
    }

    pub fn engagement_rankings(&self) -> &[RankedItem] {
        &self.engagement_rankings
    }

    pub fn summary(&self) -> &ReportSummary {
        &self.summary
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}
