//! Remote forum access: the fetch capability, the Reddit implementation of
//! it, and the pacing/retry machinery every external call goes through.

pub mod api;
pub mod fetcher;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;

mod tests;

pub use api::{classify_status, RedditCredentials, RedditFetcher};
pub use fetcher::{sanitize_all, FetchedItem, ForumFetcher, MalformedItem};
pub use metrics::FetchMetrics;
pub use rate_limiter::{GovernorConfig, GovernorStatus, RateGovernor};
pub use retry::{FetchFailure, FetchState, RetryExecutor, RetryMachine, RetryPolicy};
