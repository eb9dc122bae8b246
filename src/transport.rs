//! Playback transport: the play/pause/stop state machine shared by every
//! playable object, with scheduled transitions, transport fades and volume
//! ramps.
//!
//! All timing is in samples on the render clock. Scheduling delays are
//! milliseconds measured from the call, converted to a sample deadline when
//! the render thread picks the command up; a cancelled schedule leaves no
//! drift behind. The cancellation rule is latest-call-wins: any transport
//! call discards an unfired scheduled transition or an in-flight transport
//! fade, regardless of kind.

/// Playback state of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    Playing,
    Paused,
    #[default]
    Stopped,
}

/// The three transport verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOp {
    Play,
    Pause,
    Stop,
}

/// How a transport verb takes effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportMode {
    Instant,
    /// Fire after a delay, measured from the call.
    Scheduled { delay_ms: f32 },
    /// Ramp the transport gain over a duration; pause/stop apply their state
    /// at the end of the ramp, play applies immediately and fades in.
    Fade { duration_ms: f32 },
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    op: TransportOp,
    at_sample: u64,
}

#[derive(Debug, Clone, Copy)]
struct Fade {
    start_gain: f32,
    end_gain: f32,
    start_sample: u64,
    duration_samples: u64,
    /// State applied when the fade completes (fade-out), if any.
    then: Option<TransportOp>,
}

impl Fade {
    fn gain_at(&self, now: u64) -> f32 {
        if self.duration_samples == 0 {
            return self.end_gain;
        }
        let elapsed = now.saturating_sub(self.start_sample);
        if elapsed >= self.duration_samples {
            return self.end_gain;
        }
        let t = elapsed as f32 / self.duration_samples as f32;
        self.start_gain + (self.end_gain - self.start_gain) * t
    }

    fn finished(&self, now: u64) -> bool {
        now.saturating_sub(self.start_sample) >= self.duration_samples
    }
}

/// Per-object transport state machine, advanced by the render tick.
#[derive(Debug)]
pub(crate) struct Transport {
    state: PlayState,
    pending: Option<Pending>,
    fade: Option<Fade>,
    sample_rate: u32,
}

impl Transport {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: PlayState::Stopped,
            pending: None,
            fade: None,
            sample_rate,
        }
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    fn ms_to_samples(&self, ms: f32) -> u64 {
        (ms.max(0.0) as f64 * self.sample_rate as f64 / 1000.0).round() as u64
    }

    /// Issue a transport call. Cancels any unfired schedule or in-flight
    /// transport fade first; the latest call always wins.
    pub fn request(&mut self, op: TransportOp, mode: TransportMode, now: u64) {
        self.pending = None;
        // A cancelled fade-out never applies its target state; the gain
        // snaps to wherever the new call puts it.
        self.fade = None;
        match mode {
            TransportMode::Instant => self.fire(op),
            TransportMode::Scheduled { delay_ms } => {
                self.pending = Some(Pending {
                    op,
                    at_sample: now + self.ms_to_samples(delay_ms),
                });
            }
            TransportMode::Fade { duration_ms } => {
                let duration_samples = self.ms_to_samples(duration_ms);
                match op {
                    TransportOp::Play => {
                        self.fire(TransportOp::Play);
                        self.fade = Some(Fade {
                            start_gain: 0.0,
                            end_gain: 1.0,
                            start_sample: now,
                            duration_samples,
                            then: None,
                        });
                    }
                    TransportOp::Pause | TransportOp::Stop => {
                        self.fade = Some(Fade {
                            start_gain: 1.0,
                            end_gain: 0.0,
                            start_sample: now,
                            duration_samples,
                            then: Some(op),
                        });
                    }
                }
            }
        }
    }

    fn fire(&mut self, op: TransportOp) {
        self.state = match op {
            TransportOp::Play => PlayState::Playing,
            TransportOp::Pause => PlayState::Paused,
            TransportOp::Stop => PlayState::Stopped,
        };
    }

    /// Advance to `now`, firing due schedules and completing fades. Returns
    /// the op that fired on this tick, if any, so the owner can react (a
    /// fired stop resets the playhead).
    pub fn advance(&mut self, now: u64) -> Option<TransportOp> {
        if let Some(pending) = self.pending {
            if now >= pending.at_sample {
                self.pending = None;
                self.fire(pending.op);
                return Some(pending.op);
            }
        }
        if let Some(fade) = self.fade {
            if fade.finished(now) {
                self.fade = None;
                if let Some(op) = fade.then {
                    self.fire(op);
                    return Some(op);
                }
            }
        }
        None
    }

    /// Transport gain at `now`: 1.0 while playing steadily, interpolated
    /// during a fade, 0.0 when not playing.
    pub fn gain(&self, now: u64) -> f32 {
        if let Some(fade) = &self.fade {
            return fade.gain_at(now);
        }
        match self.state {
            PlayState::Playing => 1.0,
            _ => 0.0,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    /// Drop back to Stopped, discarding any pending schedule or fade.
    pub fn reset(&mut self) {
        self.state = PlayState::Stopped;
        self.pending = None;
        self.fade = None;
    }
}

/// A client-controlled volume with an optional linear ramp, independent of
/// transport fades.
#[derive(Debug)]
pub(crate) struct VolumeRamp {
    start: f32,
    target: f32,
    start_sample: u64,
    duration_samples: u64,
    sample_rate: u32,
}

impl VolumeRamp {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            start: 1.0,
            target: 1.0,
            start_sample: 0,
            duration_samples: 0,
            sample_rate,
        }
    }

    fn ms_to_samples(&self, ms: f32) -> u64 {
        (ms.max(0.0) as f64 * self.sample_rate as f64 / 1000.0).round() as u64
    }

    /// Set a new target volume, ramping over `ramp_ms`. With
    /// `force_previous_ramp`, an in-flight ramp snaps to its end value
    /// before the new one is applied.
    pub fn set(&mut self, gain: f32, ramp_ms: f32, force_previous_ramp: bool, now: u64) {
        let from = if force_previous_ramp {
            self.target
        } else {
            self.value_at(now)
        };
        self.start = from;
        self.target = gain.max(0.0);
        self.start_sample = now;
        self.duration_samples = self.ms_to_samples(ramp_ms);
    }

    /// Apply an explicit fade from `start` to `end` over `duration_ms`,
    /// replacing the current value immediately.
    pub fn fade(&mut self, start: f32, end: f32, duration_ms: f32, now: u64) {
        self.start = start.max(0.0);
        self.target = end.max(0.0);
        self.start_sample = now;
        self.duration_samples = self.ms_to_samples(duration_ms);
    }

    pub fn value_at(&self, now: u64) -> f32 {
        if self.duration_samples == 0 {
            return self.target;
        }
        let elapsed = now.saturating_sub(self.start_sample);
        if elapsed >= self.duration_samples {
            return self.target;
        }
        let t = elapsed as f32 / self.duration_samples as f32;
        self.start + (self.target - self.start) * t
    }

    pub fn target(&self) -> f32 {
        self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 48_000;

    fn ms(x: f32) -> u64 {
        (x as f64 * RATE as f64 / 1000.0).round() as u64
    }

    #[test]
    fn test_instant_transitions() {
        let mut t = Transport::new(RATE);
        assert_eq!(t.state(), PlayState::Stopped);
        t.request(TransportOp::Play, TransportMode::Instant, 0);
        assert_eq!(t.state(), PlayState::Playing);
        t.request(TransportOp::Pause, TransportMode::Instant, 100);
        assert_eq!(t.state(), PlayState::Paused);
        t.request(TransportOp::Stop, TransportMode::Instant, 200);
        assert_eq!(t.state(), PlayState::Stopped);
    }

    #[test]
    fn test_scheduled_pause_superseded_by_play() {
        // pause(scheduled 100ms), then play() 10ms later: the pause never
        // fires and the object is still playing at the 100ms mark.
        let mut t = Transport::new(RATE);
        t.request(TransportOp::Play, TransportMode::Instant, 0);
        t.request(
            TransportOp::Pause,
            TransportMode::Scheduled { delay_ms: 100.0 },
            0,
        );
        t.request(TransportOp::Play, TransportMode::Instant, ms(10.0));
        for now in [ms(50.0), ms(100.0), ms(150.0)] {
            assert_eq!(t.advance(now), None);
            assert_eq!(t.state(), PlayState::Playing);
        }
    }

    #[test]
    fn test_scheduled_transition_fires_at_deadline() {
        let mut t = Transport::new(RATE);
        t.request(TransportOp::Play, TransportMode::Instant, 0);
        t.request(
            TransportOp::Pause,
            TransportMode::Scheduled { delay_ms: 100.0 },
            0,
        );
        assert_eq!(t.advance(ms(99.0)), None);
        assert_eq!(t.state(), PlayState::Playing);
        assert_eq!(t.advance(ms(100.0)), Some(TransportOp::Pause));
        assert_eq!(t.state(), PlayState::Paused);
    }

    #[test]
    fn test_latest_call_wins_across_kinds() {
        let mut t = Transport::new(RATE);
        t.request(TransportOp::Play, TransportMode::Instant, 0);
        // A scheduled stop is cancelled by a fading pause, which is in turn
        // cancelled by an instant play.
        t.request(
            TransportOp::Stop,
            TransportMode::Scheduled { delay_ms: 50.0 },
            0,
        );
        t.request(
            TransportOp::Pause,
            TransportMode::Fade { duration_ms: 30.0 },
            ms(10.0),
        );
        t.request(TransportOp::Play, TransportMode::Instant, ms(20.0));
        for now in [ms(40.0), ms(50.0), ms(60.0)] {
            assert_eq!(t.advance(now), None);
        }
        assert_eq!(t.state(), PlayState::Playing);
        assert_eq!(t.gain(ms(60.0)), 1.0);
    }

    #[test]
    fn test_fade_out_applies_state_at_end() {
        let mut t = Transport::new(RATE);
        t.request(TransportOp::Play, TransportMode::Instant, 0);
        t.request(
            TransportOp::Pause,
            TransportMode::Fade { duration_ms: 50.0 },
            0,
        );
        // Still playing while the fade runs, gain descending.
        assert_eq!(t.state(), PlayState::Playing);
        assert!((t.gain(0) - 1.0).abs() < 1e-6);
        let mid = t.gain(ms(25.0));
        assert!(mid > 0.4 && mid < 0.6);
        assert_eq!(t.advance(ms(25.0)), None);
        assert_eq!(t.advance(ms(50.0)), Some(TransportOp::Pause));
        assert_eq!(t.state(), PlayState::Paused);
        assert_eq!(t.gain(ms(51.0)), 0.0);
    }

    #[test]
    fn test_fade_in_monotone() {
        let mut t = Transport::new(RATE);
        t.request(
            TransportOp::Play,
            TransportMode::Fade { duration_ms: 50.0 },
            0,
        );
        assert_eq!(t.state(), PlayState::Playing);
        let mut previous = -1.0f32;
        for step in 0..=50 {
            let gain = t.gain(ms(step as f32));
            assert!(gain >= previous);
            previous = gain;
        }
        assert!((t.gain(0) - 0.0).abs() < 1e-6);
        assert!((t.gain(ms(50.0)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_volume_ramp_endpoints_and_monotonicity() {
        // Fade 0.2 -> 0.8 over 50ms: exact endpoints, monotone in between.
        let mut volume = VolumeRamp::new(RATE);
        volume.fade(0.2, 0.8, 50.0, 0);
        assert!((volume.value_at(0) - 0.2).abs() < 1e-6);
        assert!((volume.value_at(ms(50.0)) - 0.8).abs() < 1e-6);
        let mut previous = 0.0f32;
        for step in 0..=50 {
            let v = volume.value_at(ms(step as f32));
            assert!(v >= previous);
            previous = v;
        }
    }

    #[test]
    fn test_volume_force_previous_ramp() {
        let mut volume = VolumeRamp::new(RATE);
        volume.set(1.0, 0.0, false, 0);
        volume.set(0.0, 100.0, false, 0);
        // Halfway through the ramp down, force it to conclude and set a new
        // level: the new ramp starts from the old target, not the midpoint.
        volume.set(0.6, 0.0, true, ms(50.0));
        assert!((volume.value_at(ms(50.0)) - 0.6).abs() < 1e-6);

        // Without force, the new ramp starts from the in-flight value.
        let mut volume = VolumeRamp::new(RATE);
        volume.set(0.0, 100.0, false, 0);
        let midway = volume.value_at(ms(50.0));
        assert!((midway - 0.5).abs() < 0.01);
        volume.set(1.0, 100.0, false, ms(50.0));
        assert!((volume.value_at(ms(50.0)) - midway).abs() < 0.01);
    }
}
