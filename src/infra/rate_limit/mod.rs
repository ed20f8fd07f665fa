//! Per-actor sliding-window rate limiting.
//!
//! Each actor owns a queue of admission instants. A check prunes instants that
//! fell out of the window and admits the request only if fewer than
//! `max_requests` remain. The whole read-prune-append sequence runs under the
//! map's entry lock, so two concurrent checks for the same actor never both see
//! the last free slot.
//!
//! The limiter is process-local and best-effort: separate instances do not
//! share state.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::env_or;
use crate::domain::{ActorId, AppError, ConfigError};

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Length of the sliding window
    pub window: Duration,
    /// Requests admitted per actor inside one window
    pub max_requests: usize,
    /// Upper bound on the number of actors tracked at once
    pub max_tracked_actors: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 10,
            max_tracked_actors: 10_000,
        }
    }
}

impl RateLimitConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let window_secs = env_or("RATE_LIMIT_WINDOW_SECS", defaults.window.as_secs())?;
        let max_requests = env_or("RATE_LIMIT_MAX_REQUESTS", defaults.max_requests)?;
        let max_tracked_actors = env_or("RATE_LIMIT_MAX_ACTORS", defaults.max_tracked_actors)?;

        let config = Self {
            window: Duration::from_secs(window_secs),
            max_requests,
            max_tracked_actors: max_tracked_actors.max(1),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would admit everything or stall the eviction ticker
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "RATE_LIMIT_WINDOW_SECS".to_string(),
                value: "0".to_string(),
            });
        }
        if self.max_requests == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RATE_LIMIT_MAX_REQUESTS".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

/// Sliding-window limiter keyed by actor
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    windows: DashMap<ActorId, VecDeque<Instant>>,
    config: RateLimitConfig,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config,
        }
    }

    /// Admit or reject one request from `actor` at the current instant
    pub fn check(&self, actor: ActorId) -> Result<(), AppError> {
        self.check_at(actor, Instant::now())
    }

    /// Admit or reject one request from `actor` at `now`
    pub fn check_at(&self, actor: ActorId, now: Instant) -> Result<(), AppError> {
        if !self.windows.contains_key(&actor) && self.windows.len() >= self.config.max_tracked_actors
        {
            self.make_room(now);
        }

        let window = self.config.window;
        let mut entry = self.windows.entry(actor).or_default();
        let timestamps = entry.value_mut();
        while timestamps
            .front()
            .is_some_and(|&ts| now.saturating_duration_since(ts) >= window)
        {
            timestamps.pop_front();
        }

        if timestamps.len() >= self.config.max_requests {
            warn!(actor = %actor, in_window = timestamps.len(), "Rate limit exceeded");
            return Err(AppError::RateLimited);
        }
        timestamps.push_back(now);
        Ok(())
    }

    /// Time until `actor` regains a free slot, zero if one is free now
    pub fn retry_after_at(&self, actor: ActorId, now: Instant) -> Duration {
        let Some(entry) = self.windows.get(&actor) else {
            return Duration::ZERO;
        };
        let live: Vec<Instant> = entry
            .iter()
            .copied()
            .filter(|&ts| now.saturating_duration_since(ts) < self.config.window)
            .collect();
        if live.len() < self.config.max_requests {
            return Duration::ZERO;
        }
        let oldest_blocking = live[live.len() - self.config.max_requests];
        (oldest_blocking + self.config.window).saturating_duration_since(now)
    }

    /// Drop actors with no request inside the window
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    pub fn evict_idle_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        let window = self.config.window;
        self.windows.retain(|_, timestamps| {
            timestamps
                .back()
                .is_some_and(|&last| now.saturating_duration_since(last) < window)
        });
        let evicted = before.saturating_sub(self.windows.len());
        if evicted > 0 {
            debug!(evicted, "Evicted idle rate limit windows");
        }
        evicted
    }

    /// Number of actors currently tracked
    pub fn tracked_actors(&self) -> usize {
        self.windows.len()
    }

    fn make_room(&self, now: Instant) {
        if self.evict_idle_at(now) > 0 {
            return;
        }
        // Everyone is active: drop the actor whose latest request is oldest
        let stalest = self
            .windows
            .iter()
            .filter_map(|entry| entry.value().back().map(|&last| (*entry.key(), last)))
            .min_by_key(|&(_, last)| last)
            .map(|(actor, _)| actor);
        if let Some(actor) = stalest {
            self.windows.remove(&actor);
            debug!(actor = %actor, "Evicted least recently active rate limit window");
        }
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Periodically drop idle windows. Runs until the task is aborted.
pub async fn eviction_task(limiter: Arc<SlidingWindowLimiter>, interval: Duration) {
    // tokio panics on a zero period
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        limiter.evict_idle();
    }
}
