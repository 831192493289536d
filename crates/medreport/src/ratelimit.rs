//! Sliding-window rate limiting for outbound calls.
//!
//! Each [`ResourceClass`] gets its own window of recent call timestamps. A
//! caller that finds the window full sleeps until the oldest call ages out,
//! bounded by the acquire timeout. Classes without a configured limit are
//! unlimited.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

/// Kind of outbound call being budgeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    Generation,
    Email,
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceClass::Generation => f.write_str("generation"),
            ResourceClass::Email => f.write_str("email"),
        }
    }
}

/// Ceiling for one resource class: at most `max_calls` within any `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_calls: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn per_minute(max_calls: u32) -> Self {
        Self {
            max_calls,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Timed out after {waited:?} waiting for a {class} permit")]
    Timeout {
        class: ResourceClass,
        waited: Duration,
    },

    #[error("Rate limiter state poisoned")]
    Poisoned,
}

/// Proof that a call slot was reserved. Slots are consumed on grant; the
/// permit carries the class for logging only.
#[derive(Debug)]
#[must_use]
pub struct Permit {
    pub class: ResourceClass,
    pub waited: Duration,
}

struct Window {
    limit: RateLimit,
    calls: VecDeque<Instant>,
}

impl Window {
    /// Reserves a slot if one is free, otherwise returns how long until the oldest call expires.
    fn try_reserve(&mut self, now: Instant) -> Result<(), Duration> {
        while let Some(oldest) = self.calls.front() {
            if now.duration_since(*oldest) >= self.limit.window {
                self.calls.pop_front();
            } else {
                break;
            }
        }

        if (self.calls.len() as u32) < self.limit.max_calls {
            self.calls.push_back(now);
            return Ok(());
        }

        match self.calls.front() {
            Some(oldest) => Err(self.limit.window.saturating_sub(now.duration_since(*oldest))),
            None => Err(self.limit.window),
        }
    }
}

/// Shared per-class call budget. Counters are behind a mutex that is never
/// held across an await.
pub struct RateLimiter {
    windows: Mutex<HashMap<ResourceClass, Window>>,
    acquire_timeout: Duration,
}

impl RateLimiter {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            acquire_timeout,
        }
    }

    /// A limiter with no configured classes.
    pub fn unlimited() -> Self {
        Self::new(Duration::from_secs(120))
    }

    /// Sets the ceiling for a class. A `max_calls` of zero is ignored.
    pub fn with_limit(self, class: ResourceClass, limit: RateLimit) -> Self {
        if limit.max_calls > 0 {
            if let Ok(mut windows) = self.windows.lock() {
                windows.insert(
                    class,
                    Window {
                        limit,
                        calls: VecDeque::with_capacity(limit.max_calls as usize),
                    },
                );
            }
        }
        self
    }

    pub fn limit_for(&self, class: ResourceClass) -> Option<RateLimit> {
        self.windows
            .lock()
            .ok()
            .and_then(|w| w.get(&class).map(|w| w.limit))
    }

    /// Waits until a call of `class` is allowed and reserves it.
    pub async fn acquire(&self, class: ResourceClass) -> Result<Permit, RateLimitError> {
        let started = Instant::now();
        let deadline = started + self.acquire_timeout;

        loop {
            let now = Instant::now();
            let wait = {
                let mut windows = self.windows.lock().map_err(|_| RateLimitError::Poisoned)?;
                match windows.get_mut(&class) {
                    None => None,
                    Some(window) => window.try_reserve(now).err(),
                }
            };

            let Some(wait) = wait else {
                return Ok(Permit {
                    class,
                    waited: now.duration_since(started),
                });
            };

            if now + wait > deadline {
                log::warn!(
                    "Rate limit for {} still saturated after {:?}, giving up",
                    class,
                    now.duration_since(started)
                );
                return Err(RateLimitError::Timeout {
                    class,
                    waited: now.duration_since(started),
                });
            }

            log::debug!("Rate limit for {} reached, waiting {:?}", class, wait);
            tokio::time::sleep(wait).await;
        }
    }
}
