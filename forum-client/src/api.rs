use crate::fetcher::{FetchedItem, ForumFetcher};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::{ConfigError, CoreError, FetchError, RedditConfig, ResourceHandle};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

const REDDIT_API_BASE: &str = "https://oauth.reddit.com";
const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const PAGE_SIZE: usize = 100;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    pub after: Option<String>,
    pub before: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditPostData {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    pub author: Option<String>,
    pub subreddit: String,
    pub created_utc: f64,
    pub score: i64,
    pub num_comments: i64,
    #[serde(default)]
    pub stickied: bool,
    #[serde(default)]
    pub is_self: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditCommentData {
    pub id: String,
    #[serde(default)]
    pub body: String,
    pub author: Option<String>,
    pub created_utc: f64,
    pub score: i64,
    pub parent_id: String,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

impl RedditCredentials {
    pub fn from_config(config: &RedditConfig) -> Result<Self, ConfigError> {
        let client_id = config
            .client_id
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvironmentVariable {
                var_name: "REDDIT_CLIENT_ID".to_string(),
            })?;
        let client_secret =
            config
                .client_secret
                .clone()
                .ok_or_else(|| ConfigError::MissingEnvironmentVariable {
                    var_name: "REDDIT_CLIENT_SECRET".to_string(),
                })?;
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| "rust:forum-pulse:v0.1.0".to_string());

        Ok(Self {
            client_id,
            client_secret,
            user_agent,
        })
    }
}

/// [`ForumFetcher`] backed by the Reddit OAuth API, using an application-only
/// token (client-credentials grant).
#[derive(Debug)]
pub struct RedditFetcher {
    http_client: Client,
    credentials: RedditCredentials,
    api_base: Url,
    token_url: Url,
    timeout: Duration,
    token: Mutex<Option<CachedToken>>,
}

impl RedditFetcher {
    pub fn new(credentials: RedditCredentials, timeout: Duration) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(&credentials.user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            credentials,
            api_base: parse_url(REDDIT_API_BASE)?,
            token_url: parse_url(REDDIT_TOKEN_URL)?,
            timeout,
            token: Mutex::new(None),
        })
    }

    /// Point the fetcher at a different API host, e.g. a local mirror.
    pub fn with_endpoints(mut self, api_base: &str, token_url: &str) -> Result<Self, CoreError> {
        self.api_base = parse_url(api_base)?;
        self.token_url = parse_url(token_url)?;
        Ok(self)
    }

    async fn access_token(&self) -> Result<String, FetchError> {
        let mut token = self.token.lock().await;

        if let Some(cached) = token.as_ref() {
            if cached.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(cached.value.clone());
            }
        }

        debug!("Requesting application access token");
        let response = self
            .http_client
            .post(self.token_url.clone())
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            error!("Token request failed with status {}", status);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST => {
                    FetchError::Unauthorized {
                        reason: format!("token endpoint returned {}", status),
                    }
                }
                _ => classify_status(status, "access_token").unwrap_or(FetchError::Transient {
                    reason: format!("token endpoint returned {}", status),
                }),
            });
        }

        let body: AccessTokenResponse =
            response.json().await.map_err(|e| FetchError::InvalidResponse {
                details: format!("failed to parse token response: {}", e),
            })?;

        info!("Obtained access token valid for {}s", body.expires_in);
        let value = body.access_token.clone();
        *token = Some(CachedToken {
            value: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        });

        Ok(value)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        resource: &str,
    ) -> Result<T, FetchError> {
        let access_token = self.access_token().await?;
        let url = format!("{}{}", self.api_base.as_str().trim_end_matches('/'), endpoint);

        debug!("Making Reddit API request: GET {}", endpoint);
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if let Some(mut error) = classify_status(status, resource) {
            warn!("Request to {} failed with status {}", endpoint, status);
            if let FetchError::RateLimited { retry_after } = &mut error {
                *retry_after = retry_after_seconds(response.headers());
            }
            if status == StatusCode::UNAUTHORIZED {
                // Force a fresh token next time.
                *self.token.lock().await = None;
            }
            return Err(error);
        }

        response.json().await.map_err(|e| {
            error!("Failed to parse response from {}: {}", endpoint, e);
            FetchError::InvalidResponse {
                details: format!("failed to parse {}", endpoint),
            }
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                seconds: self.timeout.as_secs(),
            }
        } else {
            FetchError::Transient {
                reason: error.to_string(),
            }
        }
    }
}

fn parse_url(raw: &str) -> Result<Url, CoreError> {
    Url::parse(raw).map_err(|e| CoreError::InvalidInput {
        message: format!("invalid URL {}: {}", raw, e),
    })
}

/// Seconds named by a `Retry-After` header; HTTP-date values are ignored.
pub fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Maps a non-success HTTP status onto the fetch error taxonomy.
pub fn classify_status(status: StatusCode, resource: &str) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }

    Some(match status.as_u16() {
        429 => FetchError::RateLimited { retry_after: None },
        401 => FetchError::Unauthorized {
            reason: "access token rejected".to_string(),
        },
        403 | 404 | 451 => FetchError::NotAccessible {
            resource: resource.to_string(),
        },
        408 => FetchError::Timeout { seconds: 0 },
        code if status.is_server_error() => FetchError::Transient {
            reason: format!("server error {}", code),
        },
        code => FetchError::InvalidResponse {
            details: format!("unexpected status {}", code),
        },
    })
}

#[async_trait]
impl ForumFetcher for RedditFetcher {
    async fn fetch_posts(
        &self,
        resource: &ResourceHandle,
        limit: usize,
        since: DateTime<Utc>,
    ) -> Result<Vec<FetchedItem>, FetchError> {
        let endpoint = format!("/r/{}/hot", resource.name);
        let cutoff = since.timestamp() as f64;
        let mut items = Vec::with_capacity(limit.min(PAGE_SIZE));
        let mut after: Option<String> = None;

        while items.len() < limit {
            let mut query = vec![
                ("limit", (limit - items.len()).min(PAGE_SIZE).to_string()),
                ("raw_json", "1".to_string()),
            ];
            if let Some(after_val) = &after {
                query.push(("after", after_val.clone()));
            }

            let listing: RedditListing<RedditPostData> =
                self.get_json(&endpoint, &query, &resource.name).await?;
            let page_len = listing.data.children.len();

            for child in listing.data.children {
                if child.data.created_utc < cutoff {
                    continue;
                }
                items.push(FetchedItem::from(child.data));
                if items.len() >= limit {
                    break;
                }
            }

            after = listing.data.after;
            if after.is_none() || page_len == 0 {
                break;
            }
        }

        info!("Retrieved {} posts from r/{}", items.len(), resource.name);
        Ok(items)
    }

    async fn fetch_comments(
        &self,
        resource: &ResourceHandle,
        post_id: &str,
        limit: usize,
    ) -> Result<Vec<FetchedItem>, FetchError> {
        let endpoint = format!("/r/{}/comments/{}", resource.name, post_id);
        let query = [
            ("limit", limit.to_string()),
            ("depth", "1".to_string()),
            ("sort", "top".to_string()),
            ("raw_json", "1".to_string()),
        ];

        // The response is [post listing, comment listing].
        let listings: Vec<RedditListing<serde_json::Value>> =
            self.get_json(&endpoint, &query, &resource.name).await?;

        let comments = listings
            .into_iter()
            .nth(1)
            .map(|listing| listing.data.children)
            .unwrap_or_default()
            .into_iter()
            .filter(|child| child.kind == "t1")
            .filter_map(|child| {
                serde_json::from_value::<RedditCommentData>(child.data)
                    .map_err(|e| debug!("Skipping unparseable comment: {}", e))
                    .ok()
            })
            .filter(|comment| comment.parent_id.starts_with("t3_"))
            .take(limit)
            .map(FetchedItem::from)
            .collect::<Vec<_>>();

        debug!(
            "Retrieved {} comments for post {} in r/{}",
            comments.len(),
            post_id,
            resource.name
        );
        Ok(comments)
    }
}

impl From<RedditPostData> for FetchedItem {
    fn from(post_data: RedditPostData) -> Self {
        Self {
            id: post_data.id,
            title: Some(post_data.title),
            body: if post_data.is_self && !post_data.selftext.is_empty() {
                Some(post_data.selftext)
            } else {
                None
            },
            author: post_data.author,
            created_utc: post_data.created_utc,
            score: post_data.score,
            num_comments: post_data.num_comments,
            parent_id: None,
        }
    }
}

impl From<RedditCommentData> for FetchedItem {
    fn from(comment: RedditCommentData) -> Self {
        let parent_id = comment
            .parent_id
            .strip_prefix("t3_")
            .unwrap_or(&comment.parent_id)
            .to_string();

        Self {
            id: comment.id,
            title: None,
            body: Some(comment.body),
            author: comment.author,
            created_utc: comment.created_utc,
            score: comment.score,
            num_comments: 0,
            parent_id: Some(parent_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn credentials() -> RedditCredentials {
        RedditCredentials {
            client_id: "test_client_id".to_string(),
            client_secret: "test_client_secret".to_string(),
            user_agent: "forum-pulse-test/1.0".to_string(),
        }
    }

    #[test]
    fn test_fetcher_creation() {
        let fetcher = RedditFetcher::new(credentials(), Duration::from_secs(30)).unwrap();
        assert_eq!(fetcher.api_base.as_str(), "https://oauth.reddit.com/");

        let mirrored = fetcher
            .with_endpoints("http://localhost:9000", "http://localhost:9000/token")
            .unwrap();
        assert_eq!(mirrored.api_base.as_str(), "http://localhost:9000/");
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let fetcher = RedditFetcher::new(credentials(), Duration::from_secs(30)).unwrap();
        assert!(fetcher.with_endpoints("not a url", "also not").is_err());
    }

    #[test]
    fn test_credentials_from_config() {
        let missing = RedditConfig::default();
        assert!(matches!(
            RedditCredentials::from_config(&missing),
            Err(ConfigError::MissingEnvironmentVariable { .. })
        ));

        let config = RedditConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            user_agent: None,
        };
        let creds = RedditCredentials::from_config(&config).unwrap();
        assert_eq!(creds.client_id, "id");
        assert!(creds.user_agent.contains("forum-pulse"));
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_seconds(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(retry_after_seconds(&headers), Some(12));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after_seconds(&headers), None);
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(StatusCode::OK, "running"), None);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "running"),
            Some(FetchError::RateLimited { retry_after: None })
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, "private_sub"),
            Some(FetchError::NotAccessible {
                resource: "private_sub".to_string()
            })
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, "gone"),
            Some(FetchError::NotAccessible {
                resource: "gone".to_string()
            })
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "running"),
            Some(FetchError::Transient { .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "running"),
            Some(FetchError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_post_conversion() {
        let post_data = RedditPostData {
            id: "test123".to_string(),
            title: "Test Post".to_string(),
            selftext: "This is test content".to_string(),
            author: Some("test_user".to_string()),
            subreddit: "test".to_string(),
            created_utc: 1640995200.0,
            score: 42,
            num_comments: 5,
            stickied: false,
            is_self: true,
        };

        let item: FetchedItem = post_data.into();
        assert_eq!(item.id, "test123");
        assert_eq!(item.title.as_deref(), Some("Test Post"));
        assert_eq!(item.body.as_deref(), Some("This is test content"));

        let raw = item.sanitize().unwrap();
        assert_eq!(raw.upvote_count, 42);
        assert_eq!(raw.child_count, 5);
        assert!(raw.parent_item_id.is_none());
    }

    #[test]
    fn test_comment_conversion_from_listing_json() {
        let json = serde_json::json!([
            {"kind": "Listing", "data": {"children": [], "after": null, "before": null}},
            {"kind": "Listing", "data": {"children": [
                {"kind": "t1", "data": {
                    "id": "c1", "body": "Try a run-walk plan?", "author": "someone",
                    "created_utc": 1640995300.0, "score": 7, "parent_id": "t3_test123"
                }},
                {"kind": "more", "data": {"count": 12, "children": ["x", "y"]}}
            ], "after": null, "before": null}}
        ]);

        let listings: Vec<RedditListing<serde_json::Value>> =
            serde_json::from_value(json).unwrap();
        let child = listings[1].data.children[0].clone();
        let comment: RedditCommentData = serde_json::from_value(child.data).unwrap();
        let item = FetchedItem::from(comment);

        assert_eq!(item.parent_id.as_deref(), Some("test123"));
        assert_eq!(item.author.as_deref(), Some("someone"));
        assert!(item.sanitize().unwrap().is_comment());
    }
}
