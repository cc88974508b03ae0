//! Submission Throttler
//!
//! Sliding window of grant timestamps bounding submissions to `capacity`
//! per rolling window. A grant holds its slot for `window + margin`, so the
//! next grant lands strictly after the broker's own window closes even with
//! some clock skew between the two sides. Expired timestamps are pruned
//! lazily on each check; no background timer runs.

use crate::error::{Error, Result};
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Throttle configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Grants allowed per window, set below the broker's hard limit
    #[serde(default = "default_capacity")]
    pub capacity_per_second: usize,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Extra hold past the window before a grant's slot is reused.
    /// With 0 the window is half-open: a grant exactly `window_ms` old is gone.
    #[serde(default = "default_margin_ms")]
    pub margin_ms: u64,
    /// Overall bound on waiting for a slot
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_capacity() -> usize {
    4
}

fn default_window_ms() -> u64 {
    1_000
}

fn default_margin_ms() -> u64 {
    50
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            capacity_per_second: default_capacity(),
            window_ms: default_window_ms(),
            margin_ms: default_margin_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl ThrottleConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// How long one grant occupies its slot
    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.window_ms + self.margin_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleStats {
    pub granted: u64,
    pub waited: u64,
    pub timed_out: u64,
}

pub struct SubmissionThrottler {
    capacity: usize,
    window: Duration,
    hold: Duration,
    acquire_timeout: Duration,
    grants: Mutex<VecDeque<Instant>>,
    granted: AtomicU64,
    waited: AtomicU64,
    timed_out: AtomicU64,
}

impl SubmissionThrottler {
    pub fn new(config: &ThrottleConfig) -> Self {
        let capacity = config.capacity_per_second.max(1);
        Self {
            capacity,
            window: config.window(),
            hold: config.hold(),
            acquire_timeout: config.acquire_timeout(),
            grants: Mutex::new(VecDeque::with_capacity(capacity)),
            granted: AtomicU64::new(0),
            waited: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Grants still inside the window
    pub fn in_window(&self) -> usize {
        let mut grants = self.grants.lock();
        prune(&mut grants, Instant::now(), self.hold);
        grants.len()
    }

    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            granted: self.granted.load(Ordering::Relaxed),
            waited: self.waited.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }

    /// Take a slot now if one is free
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now()).is_ok()
    }

    /// Take a slot, or return when the oldest grant releases its slot
    fn try_acquire_at(&self, now: Instant) -> std::result::Result<(), Instant> {
        let mut grants = self.grants.lock();
        prune(&mut grants, now, self.hold);
        if grants.len() < self.capacity {
            grants.push_back(now);
            self.granted.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        // Window is full so the front entry exists
        Err(grants.front().map_or(now, |oldest| *oldest + self.hold))
    }

    /// Wait for a slot, up to the configured acquisition timeout
    pub async fn acquire(&self) -> Result<()> {
        self.acquire_within(self.acquire_timeout).await
    }

    pub async fn acquire_within(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut counted_wait = false;
        loop {
            let now = Instant::now();
            let retry_at = match self.try_acquire_at(now) {
                Ok(()) => return Ok(()),
                Err(retry_at) => retry_at,
            };
            if now >= deadline {
                self.timed_out.fetch_add(1, Ordering::Relaxed);
                debug!("throttle slot not acquired within {:?}", timeout);
                return Err(Error::ThrottleTimeout(timeout));
            }
            if !counted_wait {
                counted_wait = true;
                self.waited.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "throttle window full ({}/{}), waiting {:?}",
                    self.capacity,
                    self.capacity,
                    retry_at.saturating_duration_since(now)
                );
            }
            tokio::time::sleep_until(retry_at.min(deadline)).await;
        }
    }
}

fn prune(grants: &mut VecDeque<Instant>, now: Instant, hold: Duration) {
    while let Some(oldest) = grants.front() {
        if now.saturating_duration_since(*oldest) >= hold {
            grants.pop_front();
        } else {
            break;
        }
    }
}
