use std::time::{Duration, Instant};

use serde::Serialize;

use crate::geometry::ChunkGeometry;

/// Width of the rendered progress bar, in characters.
pub const PROGRESS_WIDTH: usize = 40;

/// Minimum time between two reports (the final chunk is always reported).
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum time between two speed samples.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Weight of the newest sample in the smoothed rate.
const ALPHA: f64 = 0.25;

/// Callback invoked with each progress report.
pub type ProgressCallback = Box<dyn FnMut(&ProgressReport) + Send>;

/// A throttled progress snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    pub chunk: u32,
    pub chunk_count: u32,
    /// Percentage complete, 100.0 exactly at the final chunk.
    pub percent: f64,
    /// Smoothed throughput, once a full sample interval has elapsed.
    pub bytes_per_second: Option<f64>,
    pub eta: Option<Duration>,
    pub final_chunk: bool,
}

impl ProgressReport {
    /// Renders the report as a single progress line.
    pub fn render(&self) -> String {
        let filled = ((self.percent / 100.0) * PROGRESS_WIDTH as f64) as usize;
        let filled = filled.min(PROGRESS_WIDTH);
        let mut line = format!(
            "{:5.1}% [{}{}] ({}/{})",
            self.percent,
            "#".repeat(filled),
            " ".repeat(PROGRESS_WIDTH - filled),
            self.chunk + 1,
            self.chunk_count
        );

        if !self.final_chunk {
            if let Some(bps) = self.bytes_per_second {
                line.push_str(&format!(" {:4.1} kB/s", bps / 1024.0));
            }
            if let Some(eta) = self.eta {
                let eta = format_eta(eta.as_secs());
                if !eta.is_empty() {
                    line.push_str(" eta ");
                    line.push_str(&eta);
                }
            }
        }
        line
    }
}

/// Formats seconds as `1h 2m 3s`, `2m 3s` or `3s`. Zero renders as nothing.
pub fn format_eta(total: u64) -> String {
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{seconds}s")
    } else {
        String::new()
    }
}

// ---------------------------------------------------------------------------
// ProgressEstimator
// ---------------------------------------------------------------------------

/// Exponentially smoothed throughput and ETA for one transfer round.
///
/// Time is passed in by the caller so the estimator stays deterministic.
pub struct ProgressEstimator {
    chunk_size: u32,
    chunk_count: u32,
    /// Chunks completed since the estimator was reset.
    completed: u64,
    sample_time: Instant,
    sample_completed: u64,
    smoothed: Option<f64>,
    eta: Option<Duration>,
    last_report: Option<Instant>,
}

impl ProgressEstimator {
    pub fn new(geometry: &ChunkGeometry, now: Instant) -> Self {
        Self {
            chunk_size: geometry.chunk_size() as u32,
            chunk_count: geometry.chunk_count(),
            completed: 0,
            sample_time: now,
            sample_completed: 0,
            smoothed: None,
            eta: None,
            last_report: None,
        }
    }

    /// Clears all samples, starting a new round at `now`.
    pub fn reset(&mut self, now: Instant) {
        self.completed = 0;
        self.sample_time = now;
        self.sample_completed = 0;
        self.smoothed = None;
        self.eta = None;
        self.last_report = None;
    }

    /// Records completion of `chunk` at `now`.
    ///
    /// Returns a report when one is due: the first chunk, a second or more
    /// after the previous report, or the final chunk.
    pub fn update(&mut self, chunk: u32, now: Instant) -> Option<ProgressReport> {
        self.completed += 1;

        let final_chunk = chunk + 1 >= self.chunk_count;
        let due = match self.last_report {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= REPORT_INTERVAL,
        };
        if !due && !final_chunk {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.sample_time);
        if elapsed >= SAMPLE_INTERVAL {
            let bytes = (self.completed - self.sample_completed) * self.chunk_size as u64;
            let sample = bytes as f64 / elapsed.as_secs_f64();
            let smoothed = match self.smoothed {
                Some(prev) if prev > 0.0 => sample * ALPHA + prev * (1.0 - ALPHA),
                _ => sample,
            };
            self.smoothed = Some(smoothed);

            let remaining =
                self.chunk_count.saturating_sub(chunk + 1) as u64 * self.chunk_size as u64;
            if smoothed > 0.0 {
                self.eta = Some(Duration::from_secs_f64(remaining as f64 / smoothed));
            }

            self.sample_time = now;
            self.sample_completed = self.completed;
        }

        self.last_report = Some(now);
        Some(ProgressReport {
            chunk,
            chunk_count: self.chunk_count,
            percent: (chunk + 1) as f64 * 100.0 / self.chunk_count as f64,
            bytes_per_second: self.smoothed,
            eta: self.eta,
            final_chunk,
        })
    }

    pub fn bytes_per_second(&self) -> Option<f64> {
        self.smoothed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator(file_size: u32, chunk_size: u16, now: Instant) -> ProgressEstimator {
        ProgressEstimator::new(&ChunkGeometry::new(file_size, chunk_size).unwrap(), now)
    }

    #[test]
    fn first_chunk_reported_then_throttled() {
        let t0 = Instant::now();
        let mut est = estimator(100_000, 100, t0);

        let first = est.update(0, t0).unwrap();
        assert_eq!(first.bytes_per_second, None);
        assert!(est.update(1, t0 + Duration::from_millis(500)).is_none());
        assert!(est.update(2, t0 + Duration::from_millis(900)).is_none());
        assert!(est.update(3, t0 + Duration::from_millis(1100)).is_some());
    }

    #[test]
    fn final_chunk_always_reported_at_100_percent() {
        let t0 = Instant::now();
        let mut est = estimator(1000, 175, t0);
        est.update(4, t0).unwrap();
        let last = est.update(5, t0 + Duration::from_millis(10)).unwrap();
        assert!(last.final_chunk);
        assert_eq!(last.percent, 100.0);
        assert!(last.render().starts_with("100.0% [########################################]"));
    }

    #[test]
    fn first_sample_seeds_then_smooths() {
        let t0 = Instant::now();
        let mut est = estimator(1_000_000, 100, t0);

        // 10 chunks (1000 bytes) in the first second.
        for i in 0..9 {
            est.update(i, t0);
        }
        let r = est.update(9, t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(r.bytes_per_second, Some(1000.0));

        // 30 chunks (3000 bytes) in the next second: 0.25 * 3000 + 0.75 * 1000.
        for i in 10..39 {
            est.update(i, t0 + Duration::from_millis(1500));
        }
        let r = est.update(39, t0 + Duration::from_secs(2) + Duration::from_millis(1)).unwrap();
        let bps = r.bytes_per_second.unwrap();
        assert!((bps - 1500.0).abs() < 5.0, "{bps}");
    }

    #[test]
    fn eta_from_remaining_bytes() {
        let t0 = Instant::now();
        let mut est = estimator(10_000, 100, t0);
        est.update(0, t0);
        let r = est.update(9, t0 + Duration::from_secs(2)).unwrap();
        // 2 chunks in 2 s = 100 B/s; 90 chunks of 100 bytes remain.
        assert_eq!(r.bytes_per_second, Some(100.0));
        assert_eq!(r.eta, Some(Duration::from_secs(90)));
        assert!(r.render().ends_with("0.1 kB/s eta 1m 30s"));
    }

    #[test]
    fn speed_hidden_on_final_chunk() {
        let t0 = Instant::now();
        let mut est = estimator(1000, 100, t0);
        est.update(0, t0);
        let r = est.update(9, t0 + Duration::from_secs(3)).unwrap();
        assert!(r.bytes_per_second.is_some());
        assert!(!r.render().contains("kB/s"));
    }

    #[test]
    fn reset_clears_samples() {
        let t0 = Instant::now();
        let mut est = estimator(10_000, 100, t0);
        est.update(0, t0);
        est.update(5, t0 + Duration::from_secs(2));
        assert!(est.bytes_per_second().is_some());

        est.reset(t0 + Duration::from_secs(3));
        assert!(est.bytes_per_second().is_none());
        assert!(est.update(6, t0 + Duration::from_secs(3)).is_some());
    }

    #[test]
    fn format_eta_units() {
        assert_eq!(format_eta(3723), "1h 2m 3s");
        assert_eq!(format_eta(123), "2m 3s");
        assert_eq!(format_eta(60), "1m 0s");
        assert_eq!(format_eta(3), "3s");
        assert_eq!(format_eta(0), "");
    }
}
