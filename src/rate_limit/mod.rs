//! Per-identity submission throttling
//!
//! [`RateLimiter`] sums minute buckets over a sliding window. Buckets live in a
//! [`RateLimitStore`]; expired ones are removed by a periodic cleanup whose TTL
//! outlives the window.

mod limiter;
mod store;

pub use limiter::{minute_of, RateLimitStatus, RateLimiter};
pub use store::{FileRateLimitStore, InMemoryRateLimitStore, RateLimitBucket, RateLimitStore};
