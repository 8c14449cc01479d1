// GuardBand - Signal Conditioner
//
// Converts MPU6050 register triples into physical units and smooths each
// axis with a scalar Kalman estimator.  Smoothing can be switched off per
// deployment, in which case the scaled values pass straight through.

use heapless::HistoryBuffer;

use crate::config::*;
use crate::events::{RawImuReading, Sample};

/// Per-axis estimator state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterState {
    pub estimate: f32,
    pub error_covariance: f32,
    seeded: bool,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            estimate: 0.0,
            error_covariance: KALMAN_INITIAL_P,
            seeded: false,
        }
    }
}

impl FilterState {
    /// Fold one measurement in and return the new estimate.
    ///
    /// The first measurement after a reset seeds the estimate directly.
    pub fn update(&mut self, measurement: f32, q: f32, r: f32) -> f32 {
        if !self.seeded {
            self.estimate = measurement;
            self.seeded = true;
            return self.estimate;
        }
        let k = self.error_covariance / (self.error_covariance + r);
        self.estimate += k * (measurement - self.estimate);
        self.error_covariance = (1.0 - k) * self.error_covariance + q;
        self.estimate
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConditionerConfig {
    pub filtering_enabled: bool,
    pub process_noise: f32,
    pub measurement_noise: f32,
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        Self {
            filtering_enabled: FILTERING_ENABLED,
            process_noise: KALMAN_Q,
            measurement_noise: KALMAN_R,
        }
    }
}

pub struct SignalConditioner {
    config: ConditionerConfig,
    accel: [FilterState; 3],
    gyro: [FilterState; 3],
    history: HistoryBuffer<Sample, SAMPLE_HISTORY_LEN>,
}

impl SignalConditioner {
    pub fn new(config: ConditionerConfig) -> Self {
        Self {
            config,
            accel: [FilterState::default(); 3],
            gyro: [FilterState::default(); 3],
            history: HistoryBuffer::new(),
        }
    }

    pub fn config(&self) -> &ConditionerConfig {
        &self.config
    }

    /// Scale, smooth and record one reading.
    pub fn ingest(&mut self, raw: &RawImuReading, timestamp_ms: u32) -> Sample {
        let (q, r) = (self.config.process_noise, self.config.measurement_noise);
        let enabled = self.config.filtering_enabled;

        let mut accel = [0.0f32; 3];
        for (axis, (out, state)) in accel.iter_mut().zip(self.accel.iter_mut()).enumerate() {
            let g = raw.accel[axis] as f32 / ACCEL_SCALE_2G;
            *out = if enabled { state.update(g, q, r) } else { g };
        }

        let gyro = raw.gyro.map(|regs| {
            let mut rate = [0.0f32; 3];
            for (axis, (out, state)) in rate.iter_mut().zip(self.gyro.iter_mut()).enumerate() {
                let dps = regs[axis] as f32 / GYRO_SCALE_250;
                *out = if enabled { state.update(dps, q, r) } else { dps };
            }
            rate
        });

        let sample = Sample::new(accel, gyro, timestamp_ms);
        self.history.write(sample);
        sample
    }

    /// Discard every estimator state.  The next reading reseeds them.
    pub fn calibrate(&mut self) {
        self.accel = [FilterState::default(); 3];
        self.gyro = [FilterState::default(); 3];
        self.history.clear();
        log::info!("Signal conditioner recalibrated");
    }

    pub fn filter_states(&self) -> &[FilterState; 3] {
        &self.accel
    }

    pub fn history(&self) -> &HistoryBuffer<Sample, SAMPLE_HISTORY_LEN> {
        &self.history
    }
}

impl Default for SignalConditioner {
    fn default() -> Self {
        Self::new(ConditionerConfig::default())
    }
}
