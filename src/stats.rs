//! One-second aggregation of pipeline counters.
//!
//! The capture thread bumps [`CaptureCounters`] atomically; the render
//! loop owns an [`IntervalStats`] accumulator and drains both once per
//! second into a printable [`StatsLine`].

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Counters written by the capture thread and sampled by the render
/// thread. Frame IDs are strictly monotonic from 1 and never reset;
/// the per-interval capture count is drained every stats tick.
#[derive(Debug, Default)]
pub struct CaptureCounters {
    captured: AtomicU32,
    frame_id: AtomicU64,
}

impl CaptureCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next frame ID and count the capture.
    pub fn next_frame_id(&self) -> u64 {
        self.captured.fetch_add(1, Ordering::Relaxed);
        self.frame_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Latest allocated frame ID (0 before the first capture).
    pub fn frame_id(&self) -> u64 {
        self.frame_id.load(Ordering::Relaxed)
    }

    /// Drain the per-interval capture count.
    pub fn take_captured(&self) -> u32 {
        self.captured.swap(0, Ordering::Relaxed)
    }
}

/// Render-thread accumulator for one stats interval.
#[derive(Debug)]
pub struct IntervalStats {
    presented: u32,
    unique: u32,
    duplicate: u32,
    skip_min: u64,
    skip_max: u64,
    skip_sum: u64,
    skip_count: u32,
}

impl IntervalStats {
    pub fn new() -> Self {
        Self {
            presented: 0,
            unique: 0,
            duplicate: 0,
            skip_min: u64::MAX,
            skip_max: 0,
            skip_sum: 0,
            skip_count: 0,
        }
    }

    pub fn record_unique(&mut self, skip_delta: Option<u64>) {
        self.presented += 1;
        self.unique += 1;
        if let Some(delta) = skip_delta {
            self.skip_min = self.skip_min.min(delta);
            self.skip_max = self.skip_max.max(delta);
            self.skip_sum += delta;
            self.skip_count += 1;
        }
    }

    pub fn record_duplicate(&mut self) {
        self.presented += 1;
        self.duplicate += 1;
    }

    /// Close the interval: combine with the drained capture count and
    /// reset the accumulator for the next second.
    pub fn drain(&mut self, captured: u32) -> StatsLine {
        let line = StatsLine {
            presented: self.presented,
            captured,
            unique: self.unique,
            duplicate: self.duplicate,
            dropped: captured.saturating_sub(self.presented),
            skip_min: if self.skip_min == u64::MAX {
                0
            } else {
                self.skip_min
            },
            skip_max: self.skip_max,
            skip_avg: if self.skip_count > 0 {
                self.skip_sum as f32 / self.skip_count as f32
            } else {
                0.0
            },
        };
        *self = Self::new();
        line
    }
}

impl Default for IntervalStats {
    fn default() -> Self {
        Self::new()
    }
}

/// One second of pipeline statistics, formatted as
/// `Out:N Cap:N Uniq:N Dup:N Drop:N Skip:min-max(avg)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StatsLine {
    pub presented: u32,
    pub captured: u32,
    pub unique: u32,
    pub duplicate: u32,
    pub dropped: u32,
    pub skip_min: u64,
    pub skip_max: u64,
    pub skip_avg: f32,
}

impl fmt::Display for StatsLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Out:{:3} Cap:{:3} Uniq:{:3} Dup:{:3} Drop:{:3} Skip:{}-{}({:.1})",
            self.presented,
            self.captured,
            self.unique,
            self.duplicate,
            self.dropped,
            self.skip_min,
            self.skip_max,
            self.skip_avg,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_ids_start_at_one_and_are_monotonic() {
        let counters = CaptureCounters::new();
        assert_eq!(counters.frame_id(), 0);
        assert_eq!(counters.next_frame_id(), 1);
        assert_eq!(counters.next_frame_id(), 2);
        assert_eq!(counters.frame_id(), 2);
    }

    #[test]
    fn take_captured_drains_the_interval_count() {
        let counters = CaptureCounters::new();
        counters.next_frame_id();
        counters.next_frame_id();
        assert_eq!(counters.take_captured(), 2);
        assert_eq!(counters.take_captured(), 0);
        // Frame IDs survive the drain.
        assert_eq!(counters.frame_id(), 2);
    }

    #[test]
    fn unique_plus_duplicate_equals_presented() {
        let mut stats = IntervalStats::new();
        for _ in 0..40 {
            stats.record_unique(Some(2));
        }
        for _ in 0..20 {
            stats.record_duplicate();
        }
        let line = stats.drain(120);
        assert_eq!(line.unique + line.duplicate, line.presented);
        assert_eq!(line.presented, 60);
    }

    #[test]
    fn drop_count_never_goes_negative() {
        let mut stats = IntervalStats::new();
        for _ in 0..60 {
            stats.record_duplicate();
        }
        // Idle desktop: nothing captured, 60 presented.
        let line = stats.drain(0);
        assert_eq!(line.dropped, 0);
    }

    #[test]
    fn steady_double_rate_interval_formats_as_expected() {
        let mut stats = IntervalStats::new();
        stats.record_unique(None);
        for _ in 0..59 {
            stats.record_unique(Some(2));
        }
        let line = stats.drain(120);
        assert_eq!(
            line.to_string(),
            "Out: 60 Cap:120 Uniq: 60 Dup:  0 Drop: 60 Skip:2-2(2.0)"
        );
    }

    #[test]
    fn matched_rate_interval_formats_as_expected() {
        let mut stats = IntervalStats::new();
        stats.record_unique(None);
        for _ in 0..59 {
            stats.record_unique(Some(1));
        }
        let line = stats.drain(60);
        assert_eq!(
            line.to_string(),
            "Out: 60 Cap: 60 Uniq: 60 Dup:  0 Drop:  0 Skip:1-1(1.0)"
        );
    }

    #[test]
    fn idle_interval_reports_zero_skip_bounds() {
        let mut stats = IntervalStats::new();
        for _ in 0..60 {
            stats.record_duplicate();
        }
        let line = stats.drain(0);
        assert_eq!(line.unique, 0);
        assert_eq!(line.duplicate, 60);
        assert_eq!((line.skip_min, line.skip_max), (0, 0));
        assert_eq!(
            line.to_string(),
            "Out: 60 Cap:  0 Uniq:  0 Dup: 60 Drop:  0 Skip:0-0(0.0)"
        );
    }

    #[test]
    fn drain_resets_the_accumulator() {
        let mut stats = IntervalStats::new();
        stats.record_unique(Some(3));
        stats.drain(1);
        let line = stats.drain(0);
        assert_eq!(line.presented, 0);
        assert_eq!(line.skip_max, 0);
    }
}
