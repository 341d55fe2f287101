//! Frame-pacing policy for the render loop.
//!
//! When the source refresh rate exceeds the target rate, the render loop
//! has to pick *which* captured frame each vsync shows. A fixed
//! post-vsync delay drifts as capture jitter shifts the window boundary
//! (Skip:1-3 micro-stutter); waiting for a frame *identity* (capture ID
//! >= last rendered ID + skip) keeps the skip interval uniform without
//! stalling when the desktop goes idle.

use std::time::{Duration, Instant};

/// Pacing decisions fixed at startup.
#[derive(Clone, Copy, Debug)]
pub struct PacingConfig {
    /// Wait for the target frame identity instead of delaying blindly.
    pub smart_selection: bool,
    /// Spin delay applied while waiting (or unconditionally when smart
    /// selection is off). `None` disables the delay entirely.
    pub frame_delay: Option<Duration>,
    /// round(source_hz / target_hz), clamped to >= 1.
    pub target_frame_skip: u64,
}

/// Outcome of presenting one frame, fed to the stats monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    /// A frame not shown before; `skip_delta` is the ID distance to the
    /// previously shown unique frame (`None` for the first one).
    Unique { skip_delta: Option<u64> },
    /// The same frame as last iteration was shown again.
    Duplicate,
}

pub struct FramePacer {
    config: PacingConfig,
    last_observed_capture_id: u64,
    last_rendered_id: u64,
}

impl FramePacer {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            last_observed_capture_id: 0,
            last_rendered_id: 0,
        }
    }

    /// Decide how long to spin before acquiring, given the capture
    /// engine's latest allocated frame ID. Called once per iteration,
    /// right after the swap-chain latency wait.
    pub fn pre_acquire_delay(&mut self, capture_id: u64) -> Option<Duration> {
        if self.config.smart_selection && self.config.target_frame_skip > 1 {
            let desktop_active = capture_id > self.last_observed_capture_id;
            self.last_observed_capture_id = capture_id;

            if desktop_active {
                let target_id = self.last_rendered_id + self.config.target_frame_skip;
                if capture_id < target_id {
                    return self.config.frame_delay;
                }
            }
            return None;
        }

        self.config.frame_delay
    }

    /// Record the frame ID that was just presented and classify it.
    /// IDs are unsigned and monotonic; the delta is only formed for a
    /// strictly newer frame so it can never wrap.
    pub fn note_presented(&mut self, frame_id: u64) -> PresentOutcome {
        if frame_id == self.last_rendered_id {
            return PresentOutcome::Duplicate;
        }
        let skip_delta = if self.last_rendered_id > 0 && frame_id > self.last_rendered_id {
            Some(frame_id - self.last_rendered_id)
        } else {
            None
        };
        self.last_rendered_id = frame_id;
        PresentOutcome::Unique { skip_delta }
    }
}

/// round(source_hz / target_hz), clamped to >= 1. A 120 Hz source on a
/// 60 Hz target yields 2: show every second captured frame.
pub fn target_frame_skip(source_hz: f32, target_hz: f32) -> u64 {
    if source_hz <= 0.0 || target_hz <= 0.0 {
        return 1;
    }
    ((source_hz / target_hz).round() as u64).max(1)
}

/// High-precision delay that spins for the final sub-millisecond portion
/// to sidestep the OS timer granularity. Delays at or below the spin
/// threshold are served entirely by spinning.
pub fn spin_sleep(duration: Duration) {
    const SPIN_THRESHOLD: Duration = Duration::from_micros(1500);

    if duration > SPIN_THRESHOLD {
        std::thread::sleep(duration - SPIN_THRESHOLD);
    }

    let target = Instant::now() + duration.min(SPIN_THRESHOLD);
    while Instant::now() < target {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_micros(1000);

    fn smart_pacer(skip: u64) -> FramePacer {
        FramePacer::new(PacingConfig {
            smart_selection: true,
            frame_delay: Some(DELAY),
            target_frame_skip: skip,
        })
    }

    #[test]
    fn frame_skip_rounds_and_clamps() {
        assert_eq!(target_frame_skip(120.0, 60.0), 2);
        assert_eq!(target_frame_skip(60.0, 60.0), 1);
        assert_eq!(target_frame_skip(144.0, 60.0), 2);
        assert_eq!(target_frame_skip(30.0, 60.0), 1);
        assert_eq!(target_frame_skip(0.0, 60.0), 1);
        assert_eq!(target_frame_skip(59.94, 60.0), 1);
    }

    #[test]
    fn smart_selection_waits_until_the_target_identity_is_captured() {
        let mut pacer = smart_pacer(2);
        // Frame 1 rendered; the next unique frame we want is ID 3.
        pacer.note_presented(1);

        // Capture has advanced to 2: desktop active, target not yet
        // captured -> wait.
        assert_eq!(pacer.pre_acquire_delay(2), Some(DELAY));
        // Capture reached 3: no reason to wait.
        assert_eq!(pacer.pre_acquire_delay(3), None);
    }

    #[test]
    fn smart_selection_never_waits_on_an_idle_desktop() {
        let mut pacer = smart_pacer(2);
        pacer.note_presented(1);
        assert_eq!(pacer.pre_acquire_delay(2), Some(DELAY));
        // Same capture ID again: desktop idle, present the duplicate
        // immediately instead of stalling.
        assert_eq!(pacer.pre_acquire_delay(2), None);
        assert_eq!(pacer.pre_acquire_delay(2), None);
    }

    #[test]
    fn smart_selection_is_bypassed_at_skip_one() {
        let mut pacer = smart_pacer(1);
        pacer.note_presented(1);
        // 60 -> 60: fall through to the fixed delay path.
        assert_eq!(pacer.pre_acquire_delay(2), Some(DELAY));
    }

    #[test]
    fn fixed_delay_applies_unconditionally_when_smart_selection_is_off() {
        let mut pacer = FramePacer::new(PacingConfig {
            smart_selection: false,
            frame_delay: Some(DELAY),
            target_frame_skip: 2,
        });
        assert_eq!(pacer.pre_acquire_delay(0), Some(DELAY));
        assert_eq!(pacer.pre_acquire_delay(100), Some(DELAY));
    }

    #[test]
    fn disabled_delay_never_waits() {
        let mut pacer = FramePacer::new(PacingConfig {
            smart_selection: true,
            frame_delay: None,
            target_frame_skip: 2,
        });
        pacer.note_presented(1);
        assert_eq!(pacer.pre_acquire_delay(2), None);
    }

    #[test]
    fn steady_state_at_double_rate_yields_uniform_skip_two() {
        let mut pacer = smart_pacer(2);
        // Simulate 120 -> 60: capture advances by 2 between presents and
        // the loop always lands on the target identity.
        let mut capture_id = 0u64;
        let mut deltas = Vec::new();
        for _ in 0..10 {
            capture_id += 2;
            let _ = pacer.pre_acquire_delay(capture_id);
            if let PresentOutcome::Unique {
                skip_delta: Some(delta),
            } = pacer.note_presented(capture_id)
            {
                deltas.push(delta);
            }
        }
        assert!(deltas.iter().all(|&delta| delta == 2), "{deltas:?}");
    }

    #[test]
    fn presenting_the_same_frame_is_a_duplicate() {
        let mut pacer = smart_pacer(2);
        assert_eq!(
            pacer.note_presented(5),
            PresentOutcome::Unique { skip_delta: None }
        );
        assert_eq!(pacer.note_presented(5), PresentOutcome::Duplicate);
        assert_eq!(
            pacer.note_presented(7),
            PresentOutcome::Unique {
                skip_delta: Some(2)
            }
        );
    }

    #[test]
    fn spin_sleep_reaches_the_deadline() {
        let start = Instant::now();
        spin_sleep(Duration::from_micros(200));
        assert!(start.elapsed() >= Duration::from_micros(200));
    }
}
