use std::{
    f64::consts::TAU,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

/// Pulses per beat.
pub const PULSES_PER_BEAT: u32 = 24;
/// Beats per bar.
pub const BEATS_PER_BAR: u32 = 4;
/// Phase added to the LFO delta on every pulse.
pub const DELTA_STEP: f64 = TAU / 48.0;

/// Counters after one pulse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseInfo {
    pub pulses: u32,
    pub beats: u32,
    pub delta: f64,
}

impl PulseInfo {
    /// First pulse of a beat.
    pub fn is_beat(&self) -> bool {
        self.pulses == 0
    }

    /// First pulse of a bar.
    pub fn is_bar(&self) -> bool {
        self.pulses == 0 && self.beats == 0
    }
}

/// Pulse and beat counters plus the bar-to-bar tempo measurement.
#[derive(Debug, Clone)]
pub struct ClockGenerator {
    pulses: u32,
    beats: u32,
    delta: f64,
    last_bar: Instant,
}

impl ClockGenerator {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            pulses: 0,
            beats: 0,
            delta: 0.0,
            last_bar: now,
        }
    }

    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    /// Zeroes the counters and starts a new bar measurement at `now`.
    pub fn reset_at(&mut self, now: Instant) {
        self.pulses = 0;
        self.beats = 0;
        self.delta = 0.0;
        self.last_bar = now;
    }

    /// Advances one pulse and returns the updated counters.
    pub fn pulse(&mut self) -> PulseInfo {
        self.pulses += 1;
        self.delta += DELTA_STEP;
        if self.pulses >= PULSES_PER_BEAT {
            self.pulses = 0;
            self.beats += 1;
            if self.beats >= BEATS_PER_BAR {
                self.beats = 0;
            }
        }

        PulseInfo {
            pulses: self.pulses,
            beats: self.beats,
            delta: self.delta,
        }
    }

    pub fn calc_bpm(&mut self) -> u32 {
        self.calc_bpm_at(Instant::now())
    }

    /// Measures the bar that ended at `now` and starts the next one.
    pub fn calc_bpm_at(&mut self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.last_bar);
        self.last_bar = now;
        bpm_from_bar(elapsed)
    }

    pub fn pulses(&self) -> u32 {
        self.pulses
    }

    pub fn beats(&self) -> u32 {
        self.beats
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }
}

impl Default for ClockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Tempo of a four-beat bar lasting `bar`. A zero-length bar yields 0.
pub fn bpm_from_bar(bar: Duration) -> u32 {
    let millis = bar.as_secs_f64() * 1000.0;
    if millis <= 0.0 {
        return 0;
    }
    (240_000.0 / millis).round() as u32
}

/// Interval between pulses when the internal clock runs at `bpm`.
pub fn pulse_interval(bpm: f64) -> Duration {
    let bpm = bpm.max(1.0);
    Duration::from_secs_f64(60.0 / (bpm * PULSES_PER_BEAT as f64))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn wraps_pulses_into_beats_and_bars() {
        for k in 1..=100u32 {
            let mut clock = ClockGenerator::new();
            let mut beat_increments = 0;
            let mut last = None;
            for _ in 0..(PULSES_PER_BEAT * k) {
                let info = clock.pulse();
                if info.is_beat() {
                    beat_increments += 1;
                }
                last = Some(info);
            }

            let info = last.unwrap();
            assert_eq!(info.pulses, 0);
            assert_eq!(beat_increments, k);
            assert_eq!(info.beats, k % BEATS_PER_BAR);
        }
    }

    #[test]
    fn delta_accumulates_fixed_step() {
        let mut clock = ClockGenerator::new();
        for _ in 0..96 {
            clock.pulse();
        }
        assert_relative_eq!(clock.delta(), 2.0 * TAU, epsilon = 1e-9);
    }

    #[test]
    fn bar_flag_only_on_first_pulse_of_bar() {
        let mut clock = ClockGenerator::new();
        let bars: Vec<_> = (1..=192).filter(|_| clock.pulse().is_bar()).collect();
        assert_eq!(bars, [96, 192]);
    }

    #[test]
    fn bpm_from_measured_bar() {
        assert_eq!(bpm_from_bar(Duration::from_millis(500)), 480);
        assert_eq!(bpm_from_bar(Duration::from_millis(2000)), 120);
        assert_eq!(bpm_from_bar(Duration::ZERO), 0);

        let start = Instant::now();
        let mut clock = ClockGenerator::starting_at(start);
        assert_eq!(clock.calc_bpm_at(start + Duration::from_millis(500)), 480);
        assert_eq!(clock.calc_bpm_at(start + Duration::from_millis(2500)), 120);
    }

    #[test]
    fn reset_zeroes_counters() {
        let mut clock = ClockGenerator::new();
        for _ in 0..30 {
            clock.pulse();
        }
        clock.reset();
        assert_eq!((clock.pulses(), clock.beats(), clock.delta()), (0, 0, 0.0));
    }

    #[test]
    fn pulse_interval_matches_tempo() {
        assert_relative_eq!(pulse_interval(120.0).as_secs_f64(), 0.5 / 24.0, epsilon = 1e-9);
    }
}
