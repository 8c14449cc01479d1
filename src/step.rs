// GuardBand - Step Detector
//
// Threshold-crossing state machine over acceleration magnitude.  Two
// policies exist because both shipped in different firmware generations:
//
//   StanceBand     - latch when the magnitude dips below the low peak, count
//                    two steps when it settles back into the stance band
//                    around 1 g.  No timer; one dip/settle cycle per stride.
//   DualThreshold  - latch on a heel-strike peak, count one step when the
//                    magnitude falls below the low threshold, rejecting steps
//                    closer together than the minimum step interval.

use heapless::HistoryBuffer;

use crate::config::*;
use crate::events::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    StanceBand,
    DualThreshold,
}

#[derive(Debug, Clone, Copy)]
pub struct StepConfig {
    pub policy: StepPolicy,
    pub low_peak_g: f32,
    pub stance_min_g: f32,
    pub stance_max_g: f32,
    pub high_peak_g: f32,
    pub min_step_interval_ms: u32,
    pub max_step_interval_ms: u32,
    /// Cadence is recomputed after this many counted steps.
    pub cadence_update_every: u32,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            policy: StepPolicy::StanceBand,
            low_peak_g: STEP_LOW_PEAK_G,
            stance_min_g: STEP_STANCE_MIN_G,
            stance_max_g: STEP_STANCE_MAX_G,
            high_peak_g: STEP_HIGH_PEAK_G,
            min_step_interval_ms: STEP_MIN_INTERVAL_MS,
            max_step_interval_ms: MAX_STEP_INTERVAL_MS,
            cadence_update_every: CADENCE_UPDATE_EVERY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    AwaitingLowPeak,
    LowPeakLatched,
    /// Dual-threshold policy only.
    HighPeakLatched,
}

#[derive(Debug, Clone)]
pub struct StepCounterState {
    pub count: u32,
    pub phase: StepPhase,
    pub last_step_ms: Option<u32>,
    enabled: bool,
    intervals: HistoryBuffer<u32, CADENCE_WINDOW>,
    steps_since_cadence: u32,
    cadence_spm: Option<f32>,
}

impl Default for StepCounterState {
    fn default() -> Self {
        Self {
            count: 0,
            phase: StepPhase::AwaitingLowPeak,
            last_step_ms: None,
            enabled: true,
            intervals: HistoryBuffer::new(),
            steps_since_cadence: 0,
            cadence_spm: None,
        }
    }
}

impl StepCounterState {
    /// Start from a previously persisted count.
    pub fn restored(count: u32) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Steps per minute from the interval ring, once enough steps were seen.
    pub fn cadence_spm(&self) -> Option<f32> {
        self.cadence_spm
    }

    /// Zero the count and all timing.  Calling it again changes nothing.
    pub fn reset(&mut self) {
        self.count = 0;
        self.phase = StepPhase::AwaitingLowPeak;
        self.last_step_ms = None;
        self.intervals.clear();
        self.steps_since_cadence = 0;
        self.cadence_spm = None;
    }
}

/// `60000 / mean(intervals)`, or `None` for an empty or zero-length window.
pub fn cadence_from_intervals(intervals: &[u32]) -> Option<f32> {
    if intervals.is_empty() {
        return None;
    }
    let total: u64 = intervals.iter().map(|&i| i as u64).sum();
    if total == 0 {
        return None;
    }
    let mean = total as f32 / intervals.len() as f32;
    Some(60_000.0 / mean)
}

pub struct StepDetector {
    config: StepConfig,
}

impl StepDetector {
    pub fn new(config: StepConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StepConfig {
        &self.config
    }

    /// Advance the state machine by one sample.  Returns the steps added.
    pub fn process(&self, state: &mut StepCounterState, sample: &Sample) -> u32 {
        if !state.enabled {
            return 0;
        }

        let m = sample.magnitude;
        let now = sample.timestamp_ms;
        let cfg = &self.config;

        let added = match (cfg.policy, state.phase) {
            (StepPolicy::StanceBand, StepPhase::AwaitingLowPeak) => {
                if m < cfg.low_peak_g {
                    state.phase = StepPhase::LowPeakLatched;
                }
                0
            }
            (StepPolicy::StanceBand, StepPhase::LowPeakLatched) => {
                if (cfg.stance_min_g..=cfg.stance_max_g).contains(&m) {
                    state.phase = StepPhase::AwaitingLowPeak;
                    2
                } else {
                    0
                }
            }
            (StepPolicy::DualThreshold, StepPhase::AwaitingLowPeak) => {
                if m > cfg.high_peak_g {
                    state.phase = StepPhase::HighPeakLatched;
                }
                0
            }
            (StepPolicy::DualThreshold, StepPhase::HighPeakLatched) => {
                if m < cfg.low_peak_g {
                    state.phase = StepPhase::AwaitingLowPeak;
                    match state.last_step_ms {
                        Some(last) if now.wrapping_sub(last) < cfg.min_step_interval_ms => {
                            log::debug!("Step rejected: {} ms after previous", now.wrapping_sub(last));
                            0
                        }
                        _ => 1,
                    }
                } else {
                    0
                }
            }
            // Phase left over from the other policy.
            _ => {
                state.phase = StepPhase::AwaitingLowPeak;
                0
            }
        };

        if added > 0 {
            self.record_steps(state, added, now);
        } else if let Some(last) = state.last_step_ms {
            // Walking stopped: the cadence no longer describes anything.
            if state.cadence_spm.is_some() && now.wrapping_sub(last) > 2 * cfg.max_step_interval_ms {
                state.cadence_spm = None;
                state.intervals.clear();
                state.steps_since_cadence = 0;
            }
        }
        added
    }

    /// Switch counting on or off.  Switching off zeroes the count.
    pub fn set_enabled(&self, state: &mut StepCounterState, enabled: bool) {
        if !enabled {
            state.reset();
        }
        if state.enabled != enabled {
            log::info!("Step counting {}", if enabled { "enabled" } else { "disabled" });
        }
        state.enabled = enabled;
    }

    fn record_steps(&self, state: &mut StepCounterState, added: u32, now: u32) {
        if let Some(last) = state.last_step_ms {
            let per_step = now.wrapping_sub(last) / added;
            if per_step <= self.config.max_step_interval_ms {
                for _ in 0..added {
                    state.intervals.write(per_step);
                }
            }
        }
        state.count = state.count.saturating_add(added);
        state.last_step_ms = Some(now);

        state.steps_since_cadence += added;
        if state.steps_since_cadence >= self.config.cadence_update_every {
            state.steps_since_cadence = 0;
            state.cadence_spm = cadence_from_intervals(state.intervals.as_slice());
        }
        log::debug!("Steps +{} -> {}", added, state.count);
    }
}

impl Default for StepDetector {
    fn default() -> Self {
        Self::new(StepConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: u32 = 20;

    fn feed(det: &StepDetector, state: &mut StepCounterState, mags: &[f32], t0: u32) -> u32 {
        let mut t = t0;
        for &m in mags {
            det.process(state, &Sample::from_magnitude(m, t));
            t += DT;
        }
        t
    }

    /// One dip below the low peak followed by a settle into the stance band.
    fn stride() -> Vec<f32> {
        let mut v = vec![1.0; 10];
        v.extend([0.9, 0.8, 0.75, 0.8, 0.9]);
        v.extend([1.2, 1.1, 1.0, 1.0, 1.0]);
        v.extend(vec![1.0; 5]);
        v
    }

    #[test]
    fn test_cadence_from_uniform_intervals() {
        let intervals = [500u32; 20];
        let cadence = cadence_from_intervals(&intervals).unwrap();
        assert!((cadence - 120.0).abs() < 1e-3);
        assert_eq!(cadence_from_intervals(&[]), None);
        assert_eq!(cadence_from_intervals(&[0, 0]), None);
    }

    #[test]
    fn test_stance_band_counts_two_per_cycle() {
        let det = StepDetector::default();
        let mut state = StepCounterState::default();
        let mut t = 0;
        for _ in 0..3 {
            t = feed(&det, &mut state, &stride(), t);
        }
        assert_eq!(state.count, 6);
        assert_eq!(state.phase, StepPhase::AwaitingLowPeak);
    }

    #[test]
    fn test_no_step_without_low_peak() {
        let det = StepDetector::default();
        let mut state = StepCounterState::default();
        feed(&det, &mut state, &[1.0, 1.2, 0.9, 1.0, 1.3, 1.0], 0);
        assert_eq!(state.count, 0);
    }

    #[test]
    fn test_cadence_from_walking() {
        let det = StepDetector::default();
        let mut state = StepCounterState::default();
        // 25 samples at 20 ms = 500 ms per stride, 2 steps each -> 250 ms/step.
        let mut t = 0;
        for _ in 0..12 {
            t = feed(&det, &mut state, &stride(), t);
        }
        let cadence = state.cadence_spm().unwrap();
        assert!((cadence - 240.0).abs() < 1.0, "cadence {}", cadence);
    }

    #[test]
    fn test_cadence_cleared_after_standing_still() {
        let det = StepDetector::default();
        let mut state = StepCounterState::default();
        let mut t = 0;
        for _ in 0..6 {
            t = feed(&det, &mut state, &stride(), t);
        }
        assert!(state.cadence_spm().is_some());
        feed(&det, &mut state, &vec![1.0; 250], t);
        assert!(state.cadence_spm().is_none());
        assert_eq!(state.count, 12);
    }

    #[test]
    fn test_count_non_decreasing_while_enabled() {
        let det = StepDetector::default();
        let mut state = StepCounterState::default();
        let mut seed: u32 = 0x1234_5678;
        let mut prev = 0;
        for i in 0..5000u32 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let m = 0.6 + (seed >> 16) as f32 / 65_535.0 * 0.8;
            det.process(&mut state, &Sample::from_magnitude(m, i * DT));
            assert!(state.count >= prev);
            prev = state.count;
        }
        assert!(prev > 0);
    }

    #[test]
    fn test_disable_resets_and_holds() {
        let det = StepDetector::default();
        let mut state = StepCounterState::default();
        let t = feed(&det, &mut state, &stride(), 0);
        assert_eq!(state.count, 2);

        det.set_enabled(&mut state, false);
        assert_eq!(state.count, 0);
        assert_eq!(state.phase, StepPhase::AwaitingLowPeak);

        let t = feed(&det, &mut state, &stride(), t);
        assert_eq!(state.count, 0);
        assert_eq!(state.phase, StepPhase::AwaitingLowPeak);

        det.set_enabled(&mut state, true);
        feed(&det, &mut state, &stride(), t);
        assert_eq!(state.count, 2);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let det = StepDetector::default();
        let mut state = StepCounterState::default();
        let mut t = 0;
        for _ in 0..5 {
            t = feed(&det, &mut state, &stride(), t);
        }
        state.reset();
        let once = state.clone();
        state.reset();
        assert_eq!(state.count, once.count);
        assert_eq!(state.phase, once.phase);
        assert_eq!(state.last_step_ms, once.last_step_ms);
        assert_eq!(state.cadence_spm(), once.cadence_spm());
    }

    #[test]
    fn test_dual_threshold_rejects_double_count() {
        let det = StepDetector::new(StepConfig {
            policy: StepPolicy::DualThreshold,
            ..StepConfig::default()
        });
        let mut state = StepCounterState::default();
        // Two peak/valley pairs 80 ms apart: only the first is a step.
        feed(&det, &mut state, &[1.0, 1.3, 0.8, 1.3, 0.8, 1.0], 0);
        assert_eq!(state.count, 1);
        // A third pair well after the minimum interval counts.
        feed(&det, &mut state, &[1.0, 1.3, 0.8], 500);
        assert_eq!(state.count, 2);
    }

    #[test]
    fn test_restored_count_keeps_growing() {
        let det = StepDetector::default();
        let mut state = StepCounterState::restored(1000);
        feed(&det, &mut state, &stride(), 0);
        assert_eq!(state.count, 1002);
    }
}
