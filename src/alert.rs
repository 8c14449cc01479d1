// GuardBand - Alert Dispatcher
//
// Turns detector events into a buzzer pulse pattern, a display mode and an
// entry in the bounded event log.  Nothing here sleeps: the buzzer pattern is
// a pulse schedule advanced once per loop tick, and alert screens carry their
// own revert deadline.

use heapless::HistoryBuffer;

use crate::config::*;
use crate::deadline_reached;
use crate::events::{AlertEvent, AlertKind};

// ---------------------------------------------------------------------------
// Buzzer patterns
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuzzPattern {
    pub pulses: u8,
    pub on_ms: u32,
    pub off_ms: u32,
    /// A running pattern is only replaced by one of equal or higher priority.
    pub priority: u8,
}

impl BuzzPattern {
    pub const STEP_GOAL: Self = Self { pulses: 1, on_ms: 80, off_ms: 0, priority: 0 };
    pub const FIND_ME: Self = Self { pulses: 8, on_ms: 150, off_ms: 100, priority: 1 };
    pub const SEIZURE: Self = Self { pulses: 4, on_ms: 600, off_ms: 300, priority: 2 };
    pub const FALL: Self = Self { pulses: 6, on_ms: 300, off_ms: 150, priority: 3 };

    pub fn for_kind(kind: AlertKind) -> Self {
        match kind {
            AlertKind::Step    => Self::STEP_GOAL,
            AlertKind::Seizure => Self::SEIZURE,
            AlertKind::Fall    => Self::FALL,
        }
    }

    /// Time from the first rising edge to the last falling edge.
    pub fn total_ms(&self) -> u32 {
        let n = self.pulses as u32;
        n * self.on_ms + n.saturating_sub(1) * self.off_ms
    }
}

/// Non-blocking pulse state machine: {pattern, step index, next toggle}.
///
/// Even step indices are "on" phases, odd ones "off".  One pattern may wait
/// in `queued` behind a higher-priority one and starts when that one ends.
#[derive(Debug, Default)]
pub struct PulseScheduler {
    active: Option<BuzzPattern>,
    queued: Option<BuzzPattern>,
    step_index: u32,
    next_toggle_ms: u32,
    output_on: bool,
    patterns_started: u32,
}

impl PulseScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin `pattern` at `now`.  Returns `false` if a higher-priority
    /// pattern is still running and keeps that one.
    pub fn start(&mut self, pattern: BuzzPattern, now: u32) -> bool {
        if pattern.pulses == 0 {
            return false;
        }
        if let Some(current) = self.active {
            if current.priority > pattern.priority {
                return false;
            }
        }
        self.begin(pattern, now);
        true
    }

    /// Like `start`, but a pattern blocked by a higher-priority one is kept
    /// and begins when that one finishes.  A newer queued pattern replaces
    /// an older one.  Returns `true` if the pattern started right away.
    pub fn start_or_queue(&mut self, pattern: BuzzPattern, now: u32) -> bool {
        if self.start(pattern, now) {
            return true;
        }
        if pattern.pulses > 0 {
            self.queued = Some(pattern);
        }
        false
    }

    fn begin(&mut self, pattern: BuzzPattern, now: u32) {
        self.active = Some(pattern);
        self.step_index = 0;
        self.output_on = true;
        self.next_toggle_ms = now.wrapping_add(pattern.on_ms);
        self.patterns_started += 1;
    }

    /// Advance to `now` and return the level the buzzer pin should have.
    pub fn poll(&mut self, now: u32) -> bool {
        while let Some(pattern) = self.active {
            if !deadline_reached(now, self.next_toggle_ms) {
                break;
            }
            self.step_index += 1;
            if self.step_index >= 2 * pattern.pulses as u32 - 1 {
                let ended_ms = self.next_toggle_ms;
                self.active = None;
                self.output_on = false;
                match self.queued.take() {
                    Some(next) => {
                        self.begin(next, ended_ms);
                        continue;
                    }
                    None => break,
                }
            }
            self.output_on = self.step_index % 2 == 0;
            let phase = if self.output_on { pattern.on_ms } else { pattern.off_ms };
            self.next_toggle_ms = self.next_toggle_ms.wrapping_add(phase);
        }
        self.output_on
    }

    /// Silence the running pattern and drop any queued one.
    pub fn stop(&mut self) {
        self.active = None;
        self.queued = None;
        self.step_index = 0;
        self.output_on = false;
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_pattern(&self) -> Option<BuzzPattern> {
        self.active
    }

    pub fn queued_pattern(&self) -> Option<BuzzPattern> {
        self.queued
    }

    /// Number of patterns accepted since boot.
    pub fn patterns_started(&self) -> u32 {
        self.patterns_started
    }
}

// ---------------------------------------------------------------------------
// Display mode
// ---------------------------------------------------------------------------
/// What the screen shows, without the timing that drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenMode {
    #[default]
    Monitoring,
    SeizureAlert,
    FallAlert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    Monitoring,
    SeizureAlert { until_ms: u32 },
    FallAlert { until_ms: u32 },
}

impl DisplayMode {
    pub fn screen(&self) -> ScreenMode {
        match self {
            Self::Monitoring => ScreenMode::Monitoring,
            Self::SeizureAlert { .. } => ScreenMode::SeizureAlert,
            Self::FallAlert { .. } => ScreenMode::FallAlert,
        }
    }

    /// Transition for an incoming alert.  A fall screen is never replaced by
    /// a seizure screen while it is showing; step events leave the screen.
    fn on_alert(self, kind: AlertKind, now: u32, config: &DispatcherConfig) -> Self {
        match (kind, self) {
            (AlertKind::Fall, _) => Self::FallAlert {
                until_ms: now.wrapping_add(config.fall_screen_ms),
            },
            (AlertKind::Seizure, Self::FallAlert { .. }) => self,
            (AlertKind::Seizure, _) => Self::SeizureAlert {
                until_ms: now.wrapping_add(config.seizure_screen_ms),
            },
            (AlertKind::Step, _) => self,
        }
    }

    fn expire(self, now: u32) -> Self {
        match self {
            Self::SeizureAlert { until_ms } | Self::FallAlert { until_ms }
                if deadline_reached(now, until_ms) =>
            {
                Self::Monitoring
            }
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub seizure_screen_ms: u32,
    pub fall_screen_ms: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            seizure_screen_ms: SEIZURE_ALERT_SCREEN_MS,
            fall_screen_ms: FALL_ALERT_SCREEN_MS,
        }
    }
}

pub struct AlertDispatcher {
    config: DispatcherConfig,
    buzzer: PulseScheduler,
    mode: DisplayMode,
    log: HistoryBuffer<AlertEvent, EVENT_LOG_LEN>,
}

impl AlertDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            buzzer: PulseScheduler::new(),
            mode: DisplayMode::Monitoring,
            log: HistoryBuffer::new(),
        }
    }

    pub fn on_event(&mut self, event: AlertEvent, now: u32) {
        log::info!(
            "Alert: {} (severity {:.2}) at {} ms",
            event.kind.display_name(),
            event.severity,
            event.timestamp_ms
        );
        if !self.buzzer.start(BuzzPattern::for_kind(event.kind), now) {
            log::debug!("{} pattern suppressed by a higher-priority alert", event.kind.display_name());
        }
        self.mode = self.mode.on_alert(event.kind, now, &self.config);
        self.log.write(event);
    }

    /// Remote find-me request: buzz only, nothing is logged or shown.  Waits
    /// for a running alert pattern to finish rather than being dropped.
    pub fn find_me(&mut self, now: u32) {
        if self.buzzer.start_or_queue(BuzzPattern::FIND_ME, now) {
            log::info!("Find-me requested");
        } else {
            log::info!("Find-me requested, queued behind the running alert pattern");
        }
    }

    /// Wearer acknowledged the alert: silence and return to monitoring.
    pub fn acknowledge(&mut self) {
        if self.mode != DisplayMode::Monitoring || self.buzzer.is_active() {
            log::info!("Alert acknowledged");
        }
        self.buzzer.stop();
        self.mode = DisplayMode::Monitoring;
    }

    /// Advance timers; returns the buzzer level for this tick.
    pub fn tick(&mut self, now: u32) -> bool {
        let before = self.mode;
        self.mode = self.mode.expire(now);
        if before != self.mode {
            log::debug!("Alert screen expired, back to monitoring");
        }
        self.buzzer.poll(now)
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn screen(&self) -> ScreenMode {
        self.mode.screen()
    }

    pub fn buzzer(&self) -> &PulseScheduler {
        &self.buzzer
    }

    /// Logged events, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &AlertEvent> {
        self.log.oldest_ordered()
    }

    pub fn last_event(&self) -> Option<&AlertEvent> {
        self.log.recent()
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}
