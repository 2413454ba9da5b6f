//! Per-origin request rate limiting.
//!
//! # Responsibilities
//! - Count requests per origin host inside a fixed window
//! - Reset all counters wholesale when the window elapses
//! - Exempt operator-listed hosts (literals or `/regex/` patterns)
//!
//! # Design Decisions
//! - Counters key on the origin's host, so `http://` and `https://` pages of
//!   one site share a budget
//! - Fixed windows instead of a sliding log: the worst case admits twice the
//!   configured rate across a window boundary, acceptable for an abuse brake
//! - One mutexed map; contention is negligible next to the outbound network
//!   work

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

use crate::proxy::policy::{RateLimitDecision, RateLimitPolicy};

/// An `unlimited_hosts` entry failed to compile.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("unlimited host pattern #{index} must start and end with a slash")]
    UnbalancedPattern { index: usize },
    #[error("unlimited host pattern is not a valid regex: {0}")]
    Pattern(#[from] regex::Error),
}

/// Fixed-window counter keyed by origin host.
pub struct HostRateLimiter {
    max_per_period: u32,
    message: String,
    unlimited: Option<Regex>,
    counts: Mutex<HashMap<String, u32>>,
}

impl HostRateLimiter {
    pub fn new(
        max_per_period: u32,
        period_minutes: u32,
        unlimited_hosts: &[String],
    ) -> Result<Self, RateLimitError> {
        let unlimited = build_unlimited_pattern(unlimited_hosts)?;
        let period = if period_minutes == 1 {
            "minute".to_string()
        } else {
            format!("{period_minutes} minutes")
        };
        let message = format!(
            "The number of requests is limited to {max_per_period} per {period}. \
             Please try again later."
        );
        Ok(Self {
            max_per_period,
            message,
            unlimited,
            counts: Mutex::new(HashMap::new()),
        })
    }

    /// Clear every counter, starting a fresh window.
    pub fn reset(&self) {
        self.counts
            .lock()
            .expect("rate limiter mutex poisoned")
            .clear();
    }

    /// Spawn the clock-driven window reset for this limiter.
    pub fn spawn_reset(self: &Arc<Self>, period_minutes: u32) {
        let limiter = Arc::clone(self);
        let period = Duration::from_secs(u64::from(period_minutes) * 60);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.reset();
            }
        });
    }
}

impl RateLimitPolicy for HostRateLimiter {
    fn check(&self, origin: Option<&str>) -> RateLimitDecision {
        let host = origin_host(origin.unwrap_or(""));
        if let Some(pattern) = &self.unlimited {
            if pattern.is_match(&host) {
                return RateLimitDecision::Allow;
            }
        }
        let mut counts = self.counts.lock().expect("rate limiter mutex poisoned");
        let count = counts.entry(host).or_insert(0);
        *count += 1;
        if *count > self.max_per_period {
            RateLimitDecision::Deny(self.message.clone())
        } else {
            RateLimitDecision::Allow
        }
    }
}

/// Strip the scheme from an Origin value, keeping host and port.
fn origin_host(origin: &str) -> String {
    let host = match origin.find("://") {
        Some(idx) => &origin[idx + 3..],
        None => origin,
    };
    host.to_ascii_lowercase()
}

/// Compile the `unlimited_hosts` entries into one anchored, case-insensitive
/// alternation. Plain entries match literally; `/…/` entries are raw regex.
pub(crate) fn build_unlimited_pattern(
    entries: &[String],
) -> Result<Option<Regex>, RateLimitError> {
    if entries.is_empty() {
        return Ok(None);
    }
    let mut parts = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let entry = entry.trim();
        if entry.starts_with('/') || entry.ends_with('/') {
            let inner = entry
                .strip_prefix('/')
                .and_then(|e| e.strip_suffix('/'))
                .filter(|e| !e.is_empty())
                .ok_or(RateLimitError::UnbalancedPattern { index })?;
            // Validate each pattern on its own so the error names the entry.
            Regex::new(inner)?;
            parts.push(inner.to_string());
        } else {
            parts.push(regex::escape(entry));
        }
    }
    let joined = format!("(?i)^(?:{})$", parts.join("|"));
    Ok(Some(Regex::new(&joined)?))
}
