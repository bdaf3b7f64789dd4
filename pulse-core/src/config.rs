//! Pipeline configuration.
//!
//! Loaded from a TOML file; every field has a default, so an empty file plus a
//! `[[resources]]` list is a valid configuration.
//!
//! # Environment overrides
//! - `REDDIT_CLIENT_ID` → reddit.client_id
//! - `REDDIT_CLIENT_SECRET` → reddit.client_secret
//! - `REDDIT_USER_AGENT` → reddit.user_agent

use crate::error::ConfigError;
use crate::types::{Category, ResourceHandle};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    pub category: Category,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub max_items_per_resource: usize,
    pub period_days: u32,
    pub include_comments: bool,
    /// Top comments fetched per post.
    pub comment_limit: usize,
    /// Resources collected in parallel; all branches share one rate governor.
    pub concurrency: usize,
    pub fetch_timeout_secs: u64,
    pub max_transient_retries: u32,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            max_items_per_resource: 100,
            period_days: 7,
            include_comments: true,
            comment_limit: 10,
            concurrency: 4,
            fetch_timeout_secs: 30,
            max_transient_retries: 3,
        }
    }
}

impl CollectionConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_calls_per_minute: u32,
    /// First wait after a rate-limited or transient response; doubles per retry.
    pub initial_backoff_ms: u64,
    pub max_backoff_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls_per_minute: 60,
            initial_backoff_ms: 1000,
            max_backoff_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub posts_ttl_minutes: u64,
    pub comments_ttl_minutes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            posts_ttl_minutes: 60,
            comments_ttl_minutes: 30,
        }
    }
}

impl CacheConfig {
    pub fn posts_ttl(&self) -> Duration {
        Duration::from_secs(self.posts_ttl_minutes * 60)
    }

    pub fn comments_ttl(&self) -> Duration {
        Duration::from_secs(self.comments_ttl_minutes * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub horizon_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { horizon_days: 30 }
    }
}

impl RetentionConfig {
    pub fn horizon(&self) -> Duration {
        Duration::from_secs(u64::from(self.horizon_days) * 24 * 3600)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Relative change in window share needed to call a term rising or declining.
    pub trend_threshold: f64,
    pub min_trend_occurrences: u32,
    pub max_terms: usize,
    pub question_similarity: f64,
    pub max_questions: usize,
    pub engagement_top_k: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            trend_threshold: 0.2,
            min_trend_occurrences: 5,
            max_terms: 50,
            question_similarity: 0.8,
            max_questions: 20,
            engagement_top_k: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub reports_dir: PathBuf,
    pub cache_db: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("data/reports"),
            cache_db: PathBuf::from("data/cache.db"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub resources: Vec<ResourceConfig>,
    pub collection: CollectionConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub retention: RetentionConfig,
    pub analysis: AnalysisConfig,
    pub storage: StorageConfig,
    pub reddit: RedditConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resources: default_resources(),
            collection: CollectionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            retention: RetentionConfig::default(),
            analysis: AnalysisConfig::default(),
            storage: StorageConfig::default(),
            reddit: RedditConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let mut config: Self = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("REDDIT_CLIENT_ID") {
            self.reddit.client_id = Some(id);
        }
        if let Ok(secret) = std::env::var("REDDIT_CLIENT_SECRET") {
            self.reddit.client_secret = Some(secret);
        }
        if let Ok(agent) = std::env::var("REDDIT_USER_AGENT") {
            self.reddit.user_agent = Some(agent);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resources.is_empty() {
            return Err(ConfigError::EmptyResourceList);
        }

        let mut seen = HashSet::new();
        for resource in &self.resources {
            if resource.name.trim().is_empty() {
                return Err(invalid("resources.name", &resource.name));
            }
            if !seen.insert(resource.name.to_lowercase()) {
                return Err(ConfigError::DuplicateResource {
                    name: resource.name.clone(),
                });
            }
        }

        let c = &self.collection;
        if c.max_items_per_resource == 0 {
            return Err(invalid("collection.max_items_per_resource", "0"));
        }
        if c.period_days == 0 {
            return Err(invalid("collection.period_days", "0"));
        }
        if c.concurrency == 0 {
            return Err(invalid("collection.concurrency", "0"));
        }
        if c.fetch_timeout_secs == 0 {
            return Err(invalid("collection.fetch_timeout_secs", "0"));
        }
        let r = &self.rate_limit;
        if r.max_calls_per_minute == 0 {
            return Err(invalid("rate_limit.max_calls_per_minute", "0"));
        }
        if r.initial_backoff_ms == 0 {
            return Err(invalid("rate_limit.initial_backoff_ms", "0"));
        }
        if r.max_backoff() < r.initial_backoff() {
            return Err(invalid("rate_limit.max_backoff_secs", r.max_backoff_secs));
        }
        if self.cache.posts_ttl_minutes == 0 || self.cache.comments_ttl_minutes == 0 {
            return Err(invalid("cache.ttl_minutes", "0"));
        }
        if self.retention.horizon_days == 0 {
            return Err(invalid("retention.horizon_days", "0"));
        }

        let a = &self.analysis;
        if !(a.trend_threshold > 0.0 && a.trend_threshold <= 1.0) {
            return Err(invalid("analysis.trend_threshold", a.trend_threshold));
        }
        if !(a.question_similarity > 0.0 && a.question_similarity <= 1.0) {
            return Err(invalid(
                "analysis.question_similarity",
                a.question_similarity,
            ));
        }

        Ok(())
    }

    pub fn resource_handles(&self) -> Vec<ResourceHandle> {
        self.resources
            .iter()
            .map(|r| ResourceHandle::new(r.name.clone(), r.category))
            .collect()
    }
}

fn invalid(field: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

/// The communities monitored by a stock deployment.
pub fn default_resources() -> Vec<ResourceConfig> {
    let groups: [(Category, &[&str]); 4] = [
        (
            Category::AiMl,
            &[
                "ChatGPT",
                "MachineLearning",
                "artificial",
                "learnmachinelearning",
                "OpenAI",
                "ArtificialIntelligence",
                "datascience",
                "deeplearning",
                "LocalLLaMA",
                "AIPromptProgramming",
            ],
        ),
        (
            Category::Running,
            &[
                "running",
                "AdvancedRunning",
                "RunningShoeGeeks",
                "C25K",
                "ultrarunning",
            ],
        ),
        (
            Category::Nutrition,
            &["nutrition", "EatCheapAndHealthy", "keto", "loseit", "fitmeals"],
        ),
        (
            Category::StrengthTraining,
            &[
                "weightroom",
                "bodybuilding",
                "Fitness",
                "gainit",
                "naturalbodybuilding",
            ],
        ),
    ];

    groups
        .iter()
        .flat_map(|(category, names)| {
            names.iter().map(move |name| ResourceConfig {
                name: name.to_string(),
                category: *category,
            })
        })
        .collect()
}
