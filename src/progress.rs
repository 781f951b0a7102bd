//! Time-sliced progress reporting (§2 "Progress reporter"). Computes
//! percentage and bytes-per-second but only emits a log line once per
//! slice, mirroring the original `show_info(..., next_update)` pattern
//! (`original_source/src_sr/server/.../upload.py`).

use std::time::{Duration, Instant};

use tracing::info;

const REPORT_INTERVAL: Duration = Duration::from_millis(500);

pub struct ProgressReporter {
    label: String,
    started: Instant,
    next_report: Instant,
}

impl ProgressReporter {
    pub fn new(label: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            label: label.into(),
            started: now,
            next_report: now + REPORT_INTERVAL,
        }
    }

    /// Report progress if the current time slice has elapsed. `total_bytes`
    /// of `0` is treated as "size unknown" (e.g. an in-progress upload).
    pub fn report(&mut self, transferred: u64, total_bytes: u64) {
        let now = Instant::now();
        if now < self.next_report {
            return;
        }
        self.next_report = now + REPORT_INTERVAL;

        let elapsed = now.duration_since(self.started).as_secs_f64().max(0.001);
        let bytes_per_sec = transferred as f64 / elapsed;

        if total_bytes > 0 {
            let pct = (transferred as f64 / total_bytes as f64) * 100.0;
            info!(
                "{}: {:.1}% ({}/{} bytes, {:.0} B/s)",
                self.label, pct, transferred, total_bytes, bytes_per_sec
            );
        } else {
            info!(
                "{}: {} bytes transferred ({:.0} B/s)",
                self.label, transferred, bytes_per_sec
            );
        }
    }

    /// Final summary emitted once a transfer completes.
    pub fn finish(&self, total_bytes: u64) {
        let elapsed = self.started.elapsed().as_secs_f64().max(0.001);
        let bytes_per_sec = total_bytes as f64 / elapsed;
        info!(
            "{}: done, {} bytes in {:.2}s ({:.0} B/s)",
            self.label, total_bytes, elapsed, bytes_per_sec
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_does_not_panic_with_zero_total() {
        let mut reporter = ProgressReporter::new("test");
        reporter.report(0, 0);
        reporter.finish(0);
    }
}
