//! Per-service sliding-window request history.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Accounting horizon for a request counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    /// Windows in admission-check precedence order.
    pub const ALL: [Window; 3] = [Window::Minute, Window::Hour, Window::Day];

    pub fn horizon(self) -> Duration {
        match self {
            Window::Minute => Duration::from_secs(60),
            Window::Hour => Duration::from_secs(3600),
            Window::Day => Duration::from_secs(86400),
        }
    }
}

/// Timestamps of admitted requests, one ordered sequence per window.
/// Every sequence is chronologically sorted since entries are only appended.
#[derive(Debug, Clone, Default)]
pub struct RequestHistory {
    minute: VecDeque<Instant>,
    hour: VecDeque<Instant>,
    day: VecDeque<Instant>,
}

impl RequestHistory {
    fn sequence(&self, window: Window) -> &VecDeque<Instant> {
        match window {
            Window::Minute => &self.minute,
            Window::Hour => &self.hour,
            Window::Day => &self.day,
        }
    }

    fn sequence_mut(&mut self, window: Window) -> &mut VecDeque<Instant> {
        match window {
            Window::Minute => &mut self.minute,
            Window::Hour => &mut self.hour,
            Window::Day => &mut self.day,
        }
    }

    /// Drop timestamps older than each window's horizon.
    pub fn prune(&mut self, now: Instant) {
        for window in Window::ALL {
            let horizon = window.horizon();
            let sequence = self.sequence_mut(window);
            while let Some(front) = sequence.front() {
                if now.saturating_duration_since(*front) > horizon {
                    sequence.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// An admitted request counts toward every window.
    pub fn record(&mut self, now: Instant) {
        for window in Window::ALL {
            self.sequence_mut(window).push_back(now);
        }
    }

    pub fn count(&self, window: Window) -> usize {
        self.sequence(window).len()
    }

    pub fn oldest(&self, window: Window) -> Option<Instant> {
        self.sequence(window).front().copied()
    }
}
