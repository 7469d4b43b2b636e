//! Multi-window admission control for quota-limited upstream services.
//!
//! Each service keeps a trailing request history per window (minute, hour,
//! day). Before a request is admitted the history is pruned and checked
//! against the service policy; the first binding window decides the wait.

mod history;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

pub use history::{RequestHistory, Window};

fn default_burst_size() -> u32 {
    5
}

/// Request quotas for a single upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub requests_per_day: u32,
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

impl RateLimitPolicy {
    pub fn limit(&self, window: Window) -> u32 {
        match window {
            Window::Minute => self.requests_per_minute,
            Window::Hour => self.requests_per_hour,
            Window::Day => self.requests_per_day,
        }
    }
}

/// How long a request must wait, and which window imposed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionWait {
    pub window: Window,
    pub wait: Duration,
}

/// Sliding-window request counters and admission decisions.
///
/// Not synchronized on its own: the throttled caller runs `prune`, `check`
/// and `record` inside a single exclusive section.
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    policies: HashMap<String, RateLimitPolicy>,
    histories: HashMap<String, RequestHistory>,
}

impl RateLimitTracker {
    pub fn new(policies: HashMap<String, RateLimitPolicy>) -> Self {
        Self {
            policies,
            histories: HashMap::new(),
        }
    }

    /// Replace the policy for a service. Recorded history is kept.
    pub fn set_policy(&mut self, service: &str, policy: RateLimitPolicy) {
        self.policies.insert(service.to_string(), policy);
    }

    pub fn policy(&self, service: &str) -> Option<&RateLimitPolicy> {
        self.policies.get(service)
    }

    pub fn history(&self, service: &str) -> Option<&RequestHistory> {
        self.histories.get(service)
    }

    fn history_mut(&mut self, service: &str) -> &mut RequestHistory {
        self.histories.entry(service.to_string()).or_default()
    }

    pub fn prune(&mut self, service: &str) {
        let now = Instant::now();
        self.history_mut(service).prune(now);
    }

    /// Wait imposed by the first binding window, checked minute, hour, day.
    ///
    /// Windows are not combined: when several bind at once the earliest in
    /// precedence order wins even if a later one would block longer.
    pub fn check(&self, service: &str) -> Option<AdmissionWait> {
        let policy = self.policies.get(service)?;
        let history = self.histories.get(service)?;
        let now = Instant::now();

        for window in Window::ALL {
            if history.count(window) < policy.limit(window) as usize {
                continue;
            }
            let Some(oldest) = history.oldest(window) else {
                continue;
            };
            let elapsed = now.saturating_duration_since(oldest);
            if let Some(wait) = window.horizon().checked_sub(elapsed) {
                if !wait.is_zero() {
                    return Some(AdmissionWait { window, wait });
                }
            }
        }

        None
    }

    pub fn record(&mut self, service: &str) {
        let now = Instant::now();
        self.history_mut(service).record(now);
    }
}
