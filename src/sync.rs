//! Clock synchronization for streamed playback.
//!
//! A file object normally runs on the engine's internal sample clock. When
//! slaved to an external clock (a video player, a network session), the
//! object compares the externally supplied time against its own elapsed
//! time each tick. Small drift is left alone so playback continues at the
//! native rate; drift beyond the resync threshold triggers a seek, at most
//! once per freewheel interval.

/// Clock source for a streamed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Follow the engine's sample clock.
    #[default]
    Internal,
    /// Follow an externally supplied clock value.
    External,
}

pub(crate) const DEFAULT_FREEWHEEL_MS: f64 = 500.0;
pub(crate) const DEFAULT_RESYNC_THRESHOLD_MS: f64 = 50.0;

/// Drift tracking state for one streamed object.
#[derive(Debug)]
pub(crate) struct SyncClock {
    mode: SyncMode,
    external_clock_ms: f64,
    freewheel_ms: f64,
    resync_threshold_ms: f64,
    /// Engine time of the last correction, in ms.
    last_correction_at_ms: Option<f64>,
}

impl SyncClock {
    pub fn new() -> Self {
        Self {
            mode: SyncMode::Internal,
            external_clock_ms: 0.0,
            freewheel_ms: DEFAULT_FREEWHEEL_MS,
            resync_threshold_ms: DEFAULT_RESYNC_THRESHOLD_MS,
            last_correction_at_ms: None,
        }
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SyncMode) {
        if self.mode != mode {
            self.mode = mode;
            self.last_correction_at_ms = None;
        }
    }

    pub fn set_external_clock_ms(&mut self, clock_ms: f64) {
        self.external_clock_ms = clock_ms;
    }

    pub fn set_freewheel_ms(&mut self, freewheel_ms: f64) {
        self.freewheel_ms = freewheel_ms.max(0.0);
    }

    pub fn freewheel_ms(&self) -> f64 {
        self.freewheel_ms
    }

    pub fn set_resync_threshold_ms(&mut self, threshold_ms: f64) {
        self.resync_threshold_ms = threshold_ms.max(0.0);
    }

    pub fn resync_threshold_ms(&self) -> f64 {
        self.resync_threshold_ms
    }

    /// Check drift at this tick. `elapsed_ms` is the object's own playback
    /// position, `engine_now_ms` the engine clock used to pace corrections.
    /// Returns the target position in ms when a corrective seek is due.
    pub fn check(&mut self, elapsed_ms: f64, engine_now_ms: f64) -> Option<f64> {
        if self.mode != SyncMode::External {
            return None;
        }
        let drift = self.external_clock_ms - elapsed_ms;
        if drift.abs() <= self.resync_threshold_ms {
            return None;
        }
        if let Some(last) = self.last_correction_at_ms {
            if engine_now_ms - last < self.freewheel_ms {
                // Still freewheeling from the previous correction.
                return None;
            }
        }
        self.last_correction_at_ms = Some(engine_now_ms);
        Some(self.external_clock_ms.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_mode_never_corrects() {
        let mut clock = SyncClock::new();
        clock.set_external_clock_ms(10_000.0);
        assert_eq!(clock.check(0.0, 0.0), None);
    }

    #[test]
    fn test_small_drift_freewheels() {
        let mut clock = SyncClock::new();
        clock.set_mode(SyncMode::External);
        clock.set_resync_threshold_ms(20.0);
        clock.set_external_clock_ms(1010.0);
        // 10ms drift is inside the threshold.
        assert_eq!(clock.check(1000.0, 5000.0), None);
    }

    #[test]
    fn test_large_drift_corrects_once_per_freewheel() {
        // 500ms of drift against a 20ms threshold: exactly one corrective
        // seek per freewheel interval, not one per tick.
        let mut clock = SyncClock::new();
        clock.set_mode(SyncMode::External);
        clock.set_resync_threshold_ms(20.0);
        clock.set_freewheel_ms(500.0);
        clock.set_external_clock_ms(1500.0);

        let mut corrections = 0;
        // 50 ticks of ~21ms within one freewheel interval.
        for tick in 0..24 {
            let now = 5000.0 + tick as f64 * 21.0;
            if clock.check(1000.0, now).is_some() {
                corrections += 1;
            }
        }
        assert_eq!(corrections, 1);

        // After the freewheel interval expires, persisting drift corrects
        // again.
        assert_eq!(clock.check(1000.0, 5600.0), Some(1500.0));
    }

    #[test]
    fn test_mode_switch_resets_pacing() {
        let mut clock = SyncClock::new();
        clock.set_mode(SyncMode::External);
        clock.set_resync_threshold_ms(20.0);
        clock.set_external_clock_ms(2000.0);
        assert!(clock.check(0.0, 100.0).is_some());

        clock.set_mode(SyncMode::Internal);
        clock.set_mode(SyncMode::External);
        // The pacing window does not carry across a mode change.
        assert!(clock.check(0.0, 150.0).is_some());
    }
}
