//! Infrastructure layer implementations.

pub mod database;
pub mod notifier;
pub mod rate_limit;

pub use database::{InMemoryConfig, InMemoryDatabase};
pub use notifier::LogNotifier;
pub use rate_limit::{RateLimitConfig, SlidingWindowLimiter, eviction_task};
