//! Loading progress snapshot for progress UIs

use std::time::Duration;
use void_asset::{CompletedLoad, LoadError, QueueProgress};

/// Read-only loading progress
#[derive(Clone, Debug, PartialEq)]
pub struct LoadingProgress {
    /// Sum of estimated sizes over all registered assets
    pub total: u64,
    /// Sum over assets that loaded or failed permanently
    pub loaded: u64,
    /// `loaded / total`; exactly 1.0 once everything settled
    pub fraction_complete: f32,
    /// Extrapolated from recent throughput; `None` until there is enough data
    pub estimated_time_remaining: Option<Duration>,
    /// Most recent load failure
    pub last_error: Option<LoadError>,
}

impl LoadingProgress {
    /// Build a snapshot from the queue's weighted progress
    pub fn from_queue(progress: &QueueProgress) -> Self {
        let total = progress.total_weight;
        let loaded = progress.settled_weight.min(total);
        let remaining = total - loaded;

        let fraction_complete = if remaining == 0 {
            1.0
        } else {
            (loaded as f64 / total as f64) as f32
        };

        Self {
            total,
            loaded,
            fraction_complete,
            estimated_time_remaining: estimate_remaining(remaining, &progress.recent),
            last_error: progress.last_error.clone(),
        }
    }

    /// Check if every registered asset settled
    pub fn is_complete(&self) -> bool {
        self.loaded == self.total
    }
}

/// Remaining weight divided by the weight rate over the recent window
fn estimate_remaining(remaining: u64, recent: &[CompletedLoad]) -> Option<Duration> {
    if remaining == 0 {
        return Some(Duration::ZERO);
    }
    let (first, last) = (recent.first()?, recent.last()?);
    let span = last.at.saturating_duration_since(first.at).as_secs_f64();
    // The first completion only marks the start of the window
    let weight: u64 = recent.iter().skip(1).map(|c| c.weight).sum();
    if span <= 0.0 || weight == 0 {
        return None;
    }
    let rate = weight as f64 / span;
    Some(Duration::from_secs_f64(remaining as f64 / rate))
}
