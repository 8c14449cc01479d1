// GuardBand - Fall Detector
//
// Four-phase state machine over acceleration magnitude:
//
//   Idle --(m < free fall)--> FreeFall --(m > impact, after settle)--> Impact
//   Impact --(m in stillness band)--> StillnessConfirming
//   StillnessConfirming --(confirm_count in-band samples)--> fire, Idle
//
// Both post-impact phases abort once `impact_timeout_ms` has passed since
// the impact.
//
// A true fall is brief weightlessness, a sharp impact, then motionlessness.
// Vigorous movement lacks the free-fall phase; a bump lacks either the
// free fall before it or the stillness after it.

use anyhow::ensure;

use crate::config::*;
use crate::events::{AlertEvent, AlertKind, Sample};

#[derive(Debug, Clone, Copy)]
pub struct FallConfig {
    pub free_fall_g: f32,
    pub impact_g: f32,
    pub stillness_min_g: f32,
    pub stillness_max_g: f32,
    pub min_settle_ms: u32,
    pub free_fall_timeout_ms: u32,
    pub impact_timeout_ms: u32,
    pub confirm_count: u32,
    pub min_stillness_ms: u32,
}

impl Default for FallConfig {
    fn default() -> Self {
        Self {
            free_fall_g: FALL_FREE_FALL_G,
            impact_g: FALL_IMPACT_G,
            stillness_min_g: FALL_STILLNESS_MIN_G,
            stillness_max_g: FALL_STILLNESS_MAX_G,
            min_settle_ms: FALL_MIN_SETTLE_MS,
            free_fall_timeout_ms: FALL_FREE_FALL_TIMEOUT_MS,
            impact_timeout_ms: FALL_IMPACT_TIMEOUT_MS,
            confirm_count: FALL_CONFIRM_COUNT,
            min_stillness_ms: FALL_MIN_STILLNESS_MS,
        }
    }
}

impl FallConfig {
    /// Reject threshold sets that invert the physics (free fall above 1 g,
    /// impact below it, or a stillness band that does not bracket 1 g).
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.free_fall_g > 0.0 && self.free_fall_g < 1.0,
            "free-fall threshold {} g must be below 1 g",
            self.free_fall_g
        );
        ensure!(self.impact_g > 1.0, "impact threshold {} g must exceed 1 g", self.impact_g);
        ensure!(
            self.stillness_min_g < 1.0 && self.stillness_max_g > 1.0,
            "stillness band [{}, {}] g must contain 1 g",
            self.stillness_min_g,
            self.stillness_max_g
        );
        ensure!(
            self.stillness_min_g > self.free_fall_g && self.stillness_max_g < self.impact_g,
            "stillness band must sit between the free-fall and impact thresholds"
        );
        ensure!(self.confirm_count > 0, "confirmation count must be positive");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallPhase {
    #[default]
    Idle,
    FreeFall,
    Impact,
    StillnessConfirming,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FallDetectionState {
    pub phase: FallPhase,
    pub phase_start_ms: u32,
    pub stillness_confirm_count: u32,
    impact_ms: u32,
    impact_peak_g: f32,
}

impl FallDetectionState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn enter(&mut self, phase: FallPhase, now: u32) {
        log::debug!("Fall phase {:?} -> {:?} at {} ms", self.phase, phase, now);
        self.phase = phase;
        self.phase_start_ms = now;
    }

    fn abort(&mut self, reason: &str) {
        log::debug!("Fall candidate dropped in {:?}: {}", self.phase, reason);
        self.reset();
    }
}

pub struct FallDetector {
    config: FallConfig,
}

impl FallDetector {
    pub fn new(config: FallConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FallConfig {
        &self.config
    }

    fn in_stillness_band(&self, m: f32) -> bool {
        (self.config.stillness_min_g..=self.config.stillness_max_g).contains(&m)
    }

    pub fn process(&self, state: &mut FallDetectionState, sample: &Sample) -> Option<AlertEvent> {
        let cfg = &self.config;
        let m = sample.magnitude;
        let now = sample.timestamp_ms;

        match state.phase {
            FallPhase::Idle => {
                if m < cfg.free_fall_g {
                    state.enter(FallPhase::FreeFall, now);
                }
            }
            FallPhase::FreeFall => {
                let elapsed = now.wrapping_sub(state.phase_start_ms);
                if m > cfg.impact_g {
                    if elapsed >= cfg.min_settle_ms {
                        state.impact_ms = now;
                        state.impact_peak_g = m;
                        state.enter(FallPhase::Impact, now);
                    } else {
                        state.abort("impact spike before settle time");
                    }
                } else if elapsed > cfg.free_fall_timeout_ms {
                    state.abort("no impact before free-fall timeout");
                }
            }
            FallPhase::Impact => {
                if self.in_stillness_band(m) {
                    state.enter(FallPhase::StillnessConfirming, now);
                    state.stillness_confirm_count = 1;
                    return self.check_confirmed(state, now);
                }
                state.impact_peak_g = state.impact_peak_g.max(m);
                if now.wrapping_sub(state.impact_ms) > cfg.impact_timeout_ms {
                    state.abort("no stillness after impact");
                }
            }
            FallPhase::StillnessConfirming => {
                if self.in_stillness_band(m) {
                    if now.wrapping_sub(state.impact_ms) > cfg.impact_timeout_ms {
                        state.abort("stillness not confirmed before impact timeout");
                        return None;
                    }
                    state.stillness_confirm_count += 1;
                    return self.check_confirmed(state, now);
                }
                // Movement again: back to waiting for the wearer to settle.
                state.stillness_confirm_count = 0;
                state.impact_peak_g = state.impact_peak_g.max(m);
                state.enter(FallPhase::Impact, now);
                if now.wrapping_sub(state.impact_ms) > cfg.impact_timeout_ms {
                    state.abort("no stillness after impact");
                }
            }
        }
        None
    }

    fn check_confirmed(&self, state: &mut FallDetectionState, now: u32) -> Option<AlertEvent> {
        let still_for = now.wrapping_sub(state.phase_start_ms);
        if state.stillness_confirm_count >= self.config.confirm_count
            && still_for >= self.config.min_stillness_ms
        {
            let event = AlertEvent {
                kind: AlertKind::Fall,
                severity: state.impact_peak_g,
                timestamp_ms: now,
            };
            log::warn!(
                "Fall detected: impact {:.2} g, still for {} ms",
                state.impact_peak_g,
                still_for
            );
            state.reset();
            return Some(event);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: u32 = 20; // 50 Hz

    fn representative() -> FallConfig {
        FallConfig {
            free_fall_g: 0.56,
            impact_g: 1.5,
            stillness_min_g: 0.9,
            stillness_max_g: 1.1,
            confirm_count: 10,
            ..FallConfig::default()
        }
    }

    fn sequence(parts: &[(f32, usize)]) -> Vec<f32> {
        parts.iter().flat_map(|&(m, n)| std::iter::repeat(m).take(n)).collect()
    }

    fn run(det: &FallDetector, state: &mut FallDetectionState, mags: &[f32]) -> Vec<AlertEvent> {
        mags.iter()
            .enumerate()
            .filter_map(|(i, &m)| det.process(state, &Sample::from_magnitude(m, i as u32 * DT)))
            .collect()
    }

    #[test]
    fn test_synthetic_fall_fires_exactly_once() {
        let det = FallDetector::new(representative()).unwrap();
        let mut state = FallDetectionState::default();
        let mags = sequence(&[(1.0, 10), (0.3, 5), (1.0, 3), (2.0, 5), (1.0, 15)]);
        let events = run(&det, &mut state, &mags);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::Fall);
        assert!((events[0].severity - 2.0).abs() < 1e-6);
        assert_eq!(state.phase, FallPhase::Idle);
    }

    #[test]
    fn test_impact_without_free_fall_never_fires() {
        let det = FallDetector::new(representative()).unwrap();
        let mut state = FallDetectionState::default();
        let mags = sequence(&[(1.0, 10), (2.5, 5), (1.0, 40)]);
        assert!(run(&det, &mut state, &mags).is_empty());
    }

    #[test]
    fn test_free_fall_without_impact_never_fires() {
        let det = FallDetector::new(representative()).unwrap();
        let mut state = FallDetectionState::default();
        let mags = sequence(&[(1.0, 5), (0.3, 10), (1.0, 100)]);
        assert!(run(&det, &mut state, &mags).is_empty());
        assert_eq!(state.phase, FallPhase::Idle, "free fall should have timed out");
    }

    #[test]
    fn test_impact_without_stillness_never_fires() {
        let det = FallDetector::new(representative()).unwrap();
        let mut state = FallDetectionState::default();
        // Keeps moving after the impact, never 10 still samples in a row.
        let mut mags = sequence(&[(1.0, 5), (0.3, 5), (2.0, 3)]);
        for _ in 0..40 {
            mags.extend(sequence(&[(1.0, 5), (1.4, 2)]));
        }
        assert!(run(&det, &mut state, &mags).is_empty());
        assert_eq!(state.phase, FallPhase::Idle, "impact should have timed out");
    }

    #[test]
    fn test_spike_before_settle_aborts() {
        let det = FallDetector::new(representative()).unwrap();
        let mut state = FallDetectionState::default();
        // One free-fall sample immediately followed by a spike: 20 ms < settle.
        let mags = sequence(&[(1.0, 5), (0.3, 1), (2.0, 2), (1.0, 30)]);
        assert!(run(&det, &mut state, &mags).is_empty());
    }

    #[test]
    fn test_phase_order_is_required() {
        // Feed every sequence built from phase-typical blocks; a fire must
        // always be preceded by free fall, then impact, then stillness.
        let det = FallDetector::new(representative()).unwrap();
        let blocks: [(f32, usize); 4] = [(0.3, 5), (2.0, 3), (1.0, 12), (1.3, 4)];
        for a in 0..4 {
            for b in 0..4 {
                for c in 0..4 {
                    let mut state = FallDetectionState::default();
                    let mags = sequence(&[(1.2, 3), blocks[a], blocks[b], blocks[c]]);
                    let fired = !run(&det, &mut state, &mags).is_empty();
                    let ordered = a == 0 && b == 1 && c == 2;
                    assert_eq!(fired, ordered, "blocks {:?}", (a, b, c));
                }
            }
        }
    }

    #[test]
    fn test_stillness_interrupted_restarts_count() {
        let det = FallDetector::new(representative()).unwrap();
        let mut state = FallDetectionState::default();
        let mags = sequence(&[(1.0, 3), (0.3, 5), (2.0, 2), (1.0, 8), (1.3, 1), (1.0, 9)]);
        assert!(run(&det, &mut state, &mags).is_empty());
        assert_eq!(state.phase, FallPhase::StillnessConfirming);
        assert_eq!(state.stillness_confirm_count, 9);
        let event = det.process(&mut state, &Sample::from_magnitude(1.0, 560));
        assert!(event.is_some());
    }

    #[test]
    fn test_stillness_run_expires_with_impact_timeout() {
        let det = FallDetector::new(representative()).unwrap();
        let mut state = FallDetectionState::default();
        let mags = sequence(&[(1.0, 3), (0.3, 5), (2.0, 2), (1.0, 8), (1.3, 1), (1.0, 9)]);
        assert!(run(&det, &mut state, &mags).is_empty());
        assert_eq!(state.phase, FallPhase::StillnessConfirming);

        // Impact was at 160 ms; the tenth still sample arrives far too late.
        let late = 160 + FALL_IMPACT_TIMEOUT_MS + DT;
        assert!(det.process(&mut state, &Sample::from_magnitude(1.0, late)).is_none());
        assert_eq!(state.phase, FallPhase::Idle);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let det = FallDetector::new(representative()).unwrap();
        let mut state = FallDetectionState::default();
        run(&det, &mut state, &sequence(&[(1.0, 3), (0.3, 5), (2.0, 2)]));
        assert_eq!(state.phase, FallPhase::Impact);
        state.reset();
        let once = state;
        state.reset();
        assert_eq!(state, once);
        assert_eq!(state, FallDetectionState::default());
    }

    #[test]
    fn test_incoherent_thresholds_rejected() {
        let inverted = FallConfig {
            free_fall_g: 1.2,
            ..representative()
        };
        assert!(FallDetector::new(inverted).is_err());
        let low_impact = FallConfig {
            impact_g: 0.95,
            ..representative()
        };
        assert!(FallDetector::new(low_impact).is_err());
        assert!(FallConfig::default().validate().is_ok());
    }
}
