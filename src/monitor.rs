// GuardBand - Monitoring Pipeline
//
// One `tick` per sample period: condition the reading, run the step, seizure
// and fall detectors, dispatch any alerts, advance the buzzer and screen
// timers.  All mutable detector state lives in `DeviceState`; the detectors
// themselves only hold configuration.  Nothing here blocks or does I/O, the
// firmware sensor task and the host replay tool both drive it.

use crate::alert::{AlertDispatcher, DispatcherConfig};
use crate::config::*;
use crate::display::ScreenState;
use crate::events::{AlertEvent, AlertKind, RawImuReading, RemoteCommand, Sample};
use crate::fall::{FallConfig, FallDetectionState, FallDetector};
use crate::filter::{ConditionerConfig, SignalConditioner};
use crate::input::ButtonEvent;
use crate::persist::DailyCounters;
use crate::seizure::{SeizureConfig, SeizureDetectionState, SeizureDetector};
use crate::step::{StepConfig, StepCounterState, StepDetector};
use crate::telemetry::TelemetryUpdate;

const MINUTE_MS: u32 = 60_000;

#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub conditioner: ConditionerConfig,
    pub step: StepConfig,
    pub seizure: SeizureConfig,
    pub fall: FallConfig,
    pub dispatcher: DispatcherConfig,
    pub daily_step_goal: u32,
    pub active_minute_min_steps: u32,
    /// Every n-th sample goes into the telemetry batch.
    pub sample_upload_decimation: u32,
    pub screen_refresh_ms: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            conditioner: ConditionerConfig::default(),
            step: StepConfig::default(),
            seizure: SeizureConfig::default(),
            fall: FallConfig::default(),
            dispatcher: DispatcherConfig::default(),
            daily_step_goal: DAILY_STEP_GOAL,
            active_minute_min_steps: ACTIVE_MINUTE_MIN_STEPS,
            sample_upload_decimation: SAMPLE_UPLOAD_DECIMATION,
            screen_refresh_ms: SCREEN_REFRESH_MS,
        }
    }
}

/// Every piece of mutable pipeline state, built once at startup.
pub struct DeviceState {
    pub conditioner: SignalConditioner,
    pub steps: StepCounterState,
    pub seizure: SeizureDetectionState,
    pub fall: FallDetectionState,
    pub dispatcher: AlertDispatcher,
    pub daily: DailyCounters,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub sample: Sample,
    pub steps_added: u32,
    pub alerts: heapless::Vec<AlertEvent, 3>,
    /// Buzzer level to drive for this tick.
    pub buzzer_on: bool,
    pub telemetry: heapless::Vec<TelemetryUpdate, 2>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub samples: u32,
    pub skipped_samples: u32,
}

pub struct Monitor {
    config: MonitorConfig,
    step_detector: StepDetector,
    seizure_detector: SeizureDetector,
    fall_detector: FallDetector,
    state: DeviceState,

    // Active-minute window
    minute_start_ms: Option<u32>,
    minute_steps: u32,
    goal_reached: bool,

    // Change tracking for telemetry and the screen
    reported: Option<(DailyCounters, bool)>,
    shown: Option<ScreenState>,
    shown_at_ms: u32,

    stats: MonitorStats,
}

impl Monitor {
    /// Build the pipeline, seeding the step count from a restored record.
    pub fn new(config: MonitorConfig, restored: DailyCounters) -> anyhow::Result<Self> {
        let fall_detector = FallDetector::new(config.fall)?;
        let state = DeviceState {
            conditioner: SignalConditioner::new(config.conditioner),
            steps: StepCounterState::restored(restored.steps),
            seizure: SeizureDetectionState::default(),
            fall: FallDetectionState::default(),
            dispatcher: AlertDispatcher::new(config.dispatcher),
            daily: restored,
        };
        Ok(Self {
            config,
            step_detector: StepDetector::new(config.step),
            seizure_detector: SeizureDetector::new(config.seizure),
            fall_detector,
            state,
            minute_start_ms: None,
            minute_steps: 0,
            goal_reached: restored.steps >= config.daily_step_goal,
            reported: None,
            shown: None,
            shown_at_ms: 0,
            stats: MonitorStats::default(),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn daily(&self) -> DailyCounters {
        self.state.daily
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    pub fn tick(&mut self, raw: &RawImuReading, now: u32) -> TickReport {
        let mut report = TickReport::default();
        self.stats.samples = self.stats.samples.wrapping_add(1);

        let sample = self.state.conditioner.ingest(raw, now);
        report.sample = sample;

        let added = self.step_detector.process(&mut self.state.steps, &sample);
        report.steps_added = added;
        self.account_steps(added, now);
        if let Some(goal) = self.check_step_goal(now) {
            let _ = report.alerts.push(goal);
        }

        if let Some(alert) = self.seizure_detector.process(&mut self.state.seizure, &sample) {
            let _ = report.alerts.push(alert);
        }
        if let Some(alert) = self.fall_detector.process(&mut self.state.fall, &sample) {
            let _ = report.alerts.push(alert);
        }

        for alert in &report.alerts {
            self.state.dispatcher.on_event(*alert, now);
        }
        report.buzzer_on = self.state.dispatcher.tick(now);

        if let Some(update) = self.counters_update() {
            let _ = report.telemetry.push(update);
        }
        let decimation = self.config.sample_upload_decimation.max(1);
        if self.stats.samples % decimation == 0 {
            let _ = report.telemetry.push(TelemetryUpdate::Sample {
                timestamp_ms: now,
                net_milli_g: sample.net_milli_g(),
            });
        }

        report
    }

    /// A reading failed: detectors and filters keep their state, only the
    /// buzzer and screen timers advance.  Returns the buzzer level.
    pub fn skip_sample(&mut self, now: u32) -> bool {
        self.stats.skipped_samples = self.stats.skipped_samples.wrapping_add(1);
        self.state.dispatcher.tick(now)
    }

    pub fn apply_command(&mut self, command: RemoteCommand, now: u32) {
        match command {
            RemoteCommand::FindMe => self.state.dispatcher.find_me(now),
            RemoteCommand::SetStepCounting(enabled) => {
                self.step_detector.set_enabled(&mut self.state.steps, enabled);
                if !enabled {
                    self.state.daily.steps = 0;
                    self.minute_steps = 0;
                    self.goal_reached = false;
                }
            }
        }
    }

    /// Click acknowledges the active alert.  Long press is the caller's
    /// power-off path; it only needs the counters, via `daily()`.
    pub fn on_button(&mut self, event: ButtonEvent) {
        if event == ButtonEvent::Click {
            self.state.dispatcher.acknowledge();
        }
    }

    pub fn screen_state(&self) -> ScreenState {
        ScreenState {
            mode: self.state.dispatcher.screen(),
            steps: self.state.steps.count,
            cadence_spm: self.state.steps.cadence_spm(),
            step_counting_enabled: self.state.steps.is_enabled(),
        }
    }

    /// Screen to redraw, if any.  Mode changes are returned at once; counter
    /// changes at most every `screen_refresh_ms`.
    pub fn screen_update(&mut self, now: u32) -> Option<ScreenState> {
        let current = self.screen_state();
        let due = match self.shown {
            None => true,
            Some(shown) if shown.mode != current.mode => true,
            Some(shown) => {
                shown != current && now.wrapping_sub(self.shown_at_ms) >= self.config.screen_refresh_ms
            }
        };
        if due {
            self.shown = Some(current);
            self.shown_at_ms = now;
            Some(current)
        } else {
            None
        }
    }

    fn account_steps(&mut self, added: u32, now: u32) {
        self.state.daily.steps = self.state.steps.count;

        let start = *self.minute_start_ms.get_or_insert(now);
        if now.wrapping_sub(start) >= MINUTE_MS {
            if self.minute_steps >= self.config.active_minute_min_steps {
                self.state.daily.active_minutes =
                    (self.state.daily.active_minutes + 1).min(MAX_ACTIVE_MINUTES);
                log::debug!("Active minute ({} steps)", self.minute_steps);
            }
            self.minute_start_ms = Some(start.wrapping_add(MINUTE_MS));
            self.minute_steps = 0;
        }
        self.minute_steps += added;
    }

    fn check_step_goal(&mut self, now: u32) -> Option<AlertEvent> {
        let goal = self.config.daily_step_goal;
        if self.goal_reached || goal == 0 || self.state.steps.count < goal {
            return None;
        }
        self.goal_reached = true;
        Some(AlertEvent {
            kind: AlertKind::Step,
            severity: self.state.steps.count as f32 / goal as f32,
            timestamp_ms: now,
        })
    }

    fn counters_update(&mut self) -> Option<TelemetryUpdate> {
        let current = (self.state.daily, self.state.steps.is_enabled());
        if self.reported == Some(current) {
            return None;
        }
        self.reported = Some(current);
        Some(TelemetryUpdate::Counters {
            steps: current.0.steps,
            step_counting: current.1,
            daily: current.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::ScreenMode;

    /// Raw register reading with `g` on the z axis.
    fn raw(g: f32) -> RawImuReading {
        RawImuReading {
            accel: [0, 0, (g * ACCEL_SCALE_2G) as i16],
            gyro: None,
        }
    }

    fn monitor() -> Monitor {
        Monitor::new(MonitorConfig::default(), DailyCounters::default()).unwrap()
    }

    /// One stance-band stride at 50 Hz: dip then settle.
    fn stride(m: &mut Monitor, t: &mut u32) -> u32 {
        let mut added = 0;
        for g in [1.0, 0.8, 1.0, 1.0, 1.0] {
            added += m.tick(&raw(g), *t).steps_added;
            *t += 20;
        }
        added
    }

    #[test]
    fn test_restored_record_seeds_counts() {
        let restored = DailyCounters {
            steps: 512,
            active_minutes: 12,
            sleep_quality: 70,
        };
        let m = Monitor::new(MonitorConfig::default(), restored).unwrap();
        assert_eq!(m.screen_state().steps, 512);
        assert_eq!(m.daily(), restored);
    }

    #[test]
    fn test_invalid_fall_config_rejected() {
        let mut config = MonitorConfig::default();
        config.fall.free_fall_g = 2.5;
        assert!(Monitor::new(config, DailyCounters::default()).is_err());
    }

    #[test]
    fn test_skip_sample_leaves_detectors() {
        let mut m = monitor();
        m.tick(&raw(0.8), 0);
        let phase = m.state().steps.phase;
        assert!(!m.skip_sample(20));
        assert_eq!(m.state().steps.phase, phase);
        assert_eq!(m.stats().skipped_samples, 1);
        assert_eq!(m.state().conditioner.history().len(), 1);
    }

    #[test]
    fn test_step_goal_fires_once() {
        let config = MonitorConfig {
            daily_step_goal: 4,
            ..MonitorConfig::default()
        };
        let mut m = Monitor::new(config, DailyCounters::default()).unwrap();
        let mut t = 0;
        let mut goals = 0;
        for _ in 0..6 {
            for g in [1.0, 0.8, 1.0, 1.0, 1.0] {
                let report = m.tick(&raw(g), t);
                goals += report.alerts.iter().filter(|a| a.kind == AlertKind::Step).count();
                t += 20;
            }
        }
        assert_eq!(goals, 1);
        assert!(m.daily().steps >= 4);
    }

    #[test]
    fn test_active_minutes() {
        let config = MonitorConfig {
            active_minute_min_steps: 10,
            ..MonitorConfig::default()
        };
        let mut m = Monitor::new(config, DailyCounters::default()).unwrap();
        let mut t = 0;
        for _ in 0..10 {
            stride(&mut m, &mut t);
        }
        // Idle out the rest of the minute, then one more tick closes it.
        while t < MINUTE_MS {
            m.tick(&raw(1.0), t);
            t += 20;
        }
        m.tick(&raw(1.0), t);
        assert_eq!(m.daily().active_minutes, 1);

        // A quiet minute does not count.
        t += MINUTE_MS;
        m.tick(&raw(1.0), t);
        assert_eq!(m.daily().active_minutes, 1);
    }

    #[test]
    fn test_counters_reported_on_change_only() {
        let mut m = monitor();
        let first = m.tick(&raw(1.0), 0);
        assert!(first.telemetry.iter().any(|u| matches!(u, TelemetryUpdate::Counters { .. })));
        let second = m.tick(&raw(1.0), 20);
        assert!(!second.telemetry.iter().any(|u| matches!(u, TelemetryUpdate::Counters { .. })));
    }

    #[test]
    fn test_sample_upload_decimated() {
        let mut m = monitor();
        let uploads = (0..50u32)
            .map(|i| m.tick(&raw(1.25), i * 20))
            .flat_map(|r| r.telemetry.into_iter())
            .filter(|u| matches!(u, TelemetryUpdate::Sample { .. }))
            .count();
        assert_eq!(uploads, 50 / SAMPLE_UPLOAD_DECIMATION as usize);
    }

    #[test]
    fn test_screen_updates() {
        let mut m = monitor();
        assert!(m.screen_update(0).is_some());
        assert!(m.screen_update(10).is_none());
        m.apply_command(RemoteCommand::SetStepCounting(false), 20);
        // Counter change waits for the refresh interval.
        assert!(m.screen_update(30).is_none());
        assert!(m.screen_update(SCREEN_REFRESH_MS).is_some());
    }

    #[test]
    fn test_find_me_and_click() {
        let mut m = monitor();
        m.apply_command(RemoteCommand::FindMe, 0);
        assert!(m.tick(&raw(1.0), 0).buzzer_on);
        m.on_button(ButtonEvent::Click);
        assert!(!m.tick(&raw(1.0), 20).buzzer_on);
        assert_eq!(m.screen_state().mode, ScreenMode::Monitoring);
    }
}
