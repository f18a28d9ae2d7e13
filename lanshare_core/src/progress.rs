use std::time::{Duration, Instant};

/// Minimum spacing between two progress notifications (about 5 per second)
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

const MIB: f64 = 1_048_576.0;

/// Rate limiter for progress notifications during a chunked copy
#[derive(Debug)]
pub struct ProgressThrottle {
    last_update: Instant,
    interval: Duration,
}

impl ProgressThrottle {
    pub fn new() -> Self {
        Self::with_interval(PROGRESS_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            last_update: Instant::now(),
            interval,
        }
    }

    /// Returns `true` when enough time has passed since the last notification.
    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }

    pub fn ready_at(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_update) > self.interval {
            self.last_update = now;
            true
        } else {
            false
        }
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new()
    }
}

/// Completed share of a transfer in `0.0..=1.0`
pub fn fraction(done: u64, total: u64) -> f32 {
    if total == 0 {
        return 1.0;
    }
    (done as f64 / total as f64).min(1.0) as f32
}

/// Two-line label shown next to a progress bar, e.g. `"photo.jpg\n1.5/3.0 MB"`
pub fn progress_label(title: &str, done: u64, total: u64) -> String {
    format!(
        "{}\n{:.1}/{:.1} MB",
        title,
        done as f64 / MIB,
        total as f64 / MIB
    )
}

pub fn completed_label(title: &str) -> String {
    format!("{}\nCompleted!", title)
}
