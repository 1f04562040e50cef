//! Progress-report throttling shared by the local transcription worker
//! and the remote node agent.

use std::time::{Duration, Instant};

/// Gate for progress updates: pass when at least `min_interval` has
/// elapsed or the percentage moved by `min_delta` points, and always at
/// completion. Progress never goes backwards through the gate.
#[derive(Debug)]
pub struct ProgressThrottle {
    min_interval: Duration,
    min_delta: i64,
    last_percent: i64,
    last_report: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(min_interval: Duration, min_delta: i64) -> Self {
        Self {
            min_interval,
            min_delta,
            last_percent: 0,
            last_report: None,
        }
    }

    /// The 5 s / 5 point gate used throughout
    pub fn standard() -> Self {
        Self::new(Duration::from_secs(5), 5)
    }

    /// Returns true when this percentage should be reported
    pub fn should_report(&mut self, percent: i64) -> bool {
        if percent <= self.last_percent {
            return false;
        }

        let elapsed_ok = self
            .last_report
            .map(|t| t.elapsed() >= self.min_interval)
            .unwrap_or(true);
        let delta_ok = percent - self.last_percent >= self.min_delta;
        let completing = percent >= 99;

        if elapsed_ok || delta_ok || completing {
            self.last_percent = percent;
            self.last_report = Some(Instant::now());
            true
        } else {
            false
        }
    }
}
