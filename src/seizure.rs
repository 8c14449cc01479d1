// GuardBand - Seizure Detector
//
// Counts over-threshold samples ("bursts") inside an accumulation window.
// A lone spike is noise; sustained high-frequency bursts over several seconds
// approximate the signature of tonic-clonic motion.

use crate::config::*;
use crate::events::{AlertEvent, AlertKind, Sample};

#[derive(Debug, Clone, Copy)]
pub struct SeizureConfig {
    pub threshold_g: f32,
    pub min_duration_ms: u32,
    pub min_burst_count: u32,
    pub reset_timeout_ms: u32,
}

impl Default for SeizureConfig {
    fn default() -> Self {
        Self {
            threshold_g: SEIZURE_THRESHOLD_G,
            min_duration_ms: SEIZURE_MIN_DURATION_MS,
            min_burst_count: SEIZURE_MIN_BURSTS,
            reset_timeout_ms: SEIZURE_RESET_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SeizureDetectionState {
    #[default]
    Idle,
    Accumulating {
        start_ms: u32,
        burst_count: u32,
        last_activity_ms: u32,
        peak_g: f32,
    },
}

impl SeizureDetectionState {
    pub fn reset(&mut self) {
        *self = Self::Idle;
    }

    pub fn burst_count(&self) -> u32 {
        match self {
            Self::Idle => 0,
            Self::Accumulating { burst_count, .. } => *burst_count,
        }
    }
}

pub struct SeizureDetector {
    config: SeizureConfig,
}

impl SeizureDetector {
    pub fn new(config: SeizureConfig) -> Self {
        Self { config }
    }

    pub fn process(&self, state: &mut SeizureDetectionState, sample: &Sample) -> Option<AlertEvent> {
        let now = sample.timestamp_ms;
        let m = sample.magnitude;
        let burst = m > self.config.threshold_g;

        match state {
            SeizureDetectionState::Idle => {
                if burst {
                    *state = SeizureDetectionState::Accumulating {
                        start_ms: now,
                        burst_count: 1,
                        last_activity_ms: now,
                        peak_g: m,
                    };
                    log::debug!("Seizure window opened ({:.2} g)", m);
                }
                None
            }
            SeizureDetectionState::Accumulating {
                start_ms,
                burst_count,
                last_activity_ms,
                peak_g,
            } => {
                if burst {
                    *burst_count += 1;
                    *last_activity_ms = now;
                    *peak_g = peak_g.max(m);
                } else if now.wrapping_sub(*last_activity_ms) > self.config.reset_timeout_ms {
                    log::debug!("Seizure window closed after {} bursts (false alarm)", burst_count);
                    state.reset();
                    return None;
                }

                let elapsed = now.wrapping_sub(*start_ms);
                if elapsed >= self.config.min_duration_ms && *burst_count >= self.config.min_burst_count {
                    let event = AlertEvent {
                        kind: AlertKind::Seizure,
                        severity: *peak_g,
                        timestamp_ms: now,
                    };
                    log::warn!(
                        "Seizure-like motion: {} bursts over {} ms, peak {:.2} g",
                        burst_count,
                        elapsed,
                        peak_g
                    );
                    state.reset();
                    return Some(event);
                }
                None
            }
        }
    }
}

impl Default for SeizureDetector {
    fn default() -> Self {
        Self::new(SeizureConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: u32 = 20;

    fn config() -> SeizureConfig {
        SeizureConfig {
            threshold_g: 2.0,
            min_duration_ms: 2000,
            min_burst_count: 10,
            reset_timeout_ms: 500,
        }
    }

    fn run(det: &SeizureDetector, state: &mut SeizureDetectionState, mags: &[f32]) -> Vec<AlertEvent> {
        mags.iter()
            .enumerate()
            .filter_map(|(i, &m)| det.process(state, &Sample::from_magnitude(m, i as u32 * DT)))
            .collect()
    }

    /// Alternating shake: one burst every other sample.
    fn shaking(samples: usize) -> Vec<f32> {
        (0..samples).map(|i| if i % 2 == 0 { 2.6 } else { 1.2 }).collect()
    }

    #[test]
    fn test_single_spike_never_fires() {
        let det = SeizureDetector::new(config());
        let mut state = SeizureDetectionState::default();
        let mut mags = vec![1.0; 10];
        mags.push(3.0);
        mags.extend(vec![1.0; 300]);
        assert!(run(&det, &mut state, &mags).is_empty());
        assert_eq!(state, SeizureDetectionState::Idle);
    }

    #[test]
    fn test_sustained_shaking_fires_once() {
        let det = SeizureDetector::new(config());
        let mut state = SeizureDetectionState::default();
        // 3 s of shaking: duration gate reached at 2 s.
        let events = run(&det, &mut state, &shaking(150));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::Seizure);
        assert!((events[0].severity - 2.6).abs() < 1e-6);
        assert_eq!(events[0].timestamp_ms, 2000);
    }

    #[test]
    fn test_duration_gate_without_enough_bursts() {
        let det = SeizureDetector::new(config());
        let mut state = SeizureDetectionState::default();
        // A burst every 400 ms keeps the window open but only 7 bursts in 2.4 s.
        let mags: Vec<f32> = (0..125).map(|i| if i % 20 == 0 { 2.5 } else { 1.0 }).collect();
        assert!(run(&det, &mut state, &mags[..121]).is_empty());
    }

    #[test]
    fn test_burst_gate_without_enough_duration() {
        let det = SeizureDetector::new(config());
        let mut state = SeizureDetectionState::default();
        // 40 bursts in 0.8 s then quiet: burst count met, duration never.
        let mut mags = vec![2.5; 40];
        mags.extend(vec![1.0; 100]);
        assert!(run(&det, &mut state, &mags).is_empty());
        assert_eq!(state, SeizureDetectionState::Idle);
    }

    #[test]
    fn test_quiet_gap_resets_window() {
        let det = SeizureDetector::new(config());
        let mut state = SeizureDetectionState::default();
        let mut mags = shaking(50);
        mags.extend(vec![1.0; 40]); // 800 ms quiet > 500 ms timeout
        run(&det, &mut state, &mags);
        assert_eq!(state, SeizureDetectionState::Idle);
        assert_eq!(state.burst_count(), 0);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let det = SeizureDetector::new(config());
        let mut state = SeizureDetectionState::default();
        run(&det, &mut state, &shaking(20));
        assert!(state.burst_count() > 0);
        state.reset();
        let once = state;
        state.reset();
        assert_eq!(state, once);
        assert_eq!(state, SeizureDetectionState::Idle);
    }
}
