// GuardBand - System Events & Data Types

use crate::display::ScreenState;

// ---------------------------------------------------------------------------
// Raw IMU registers (device-native integer units, MPU6050 big-endian pairs)
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawImuReading {
    pub accel: [i16; 3],
    /// Absent on boards populated with an accelerometer-only part.
    pub gyro: Option<[i16; 3]>,
}

// ---------------------------------------------------------------------------
// Conditioned sample, one per loop tick
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sample {
    /// Acceleration in g.
    pub accel: [f32; 3],
    /// Angular rate in deg/s.
    pub gyro: Option<[f32; 3]>,
    /// Euclidean norm of `accel`, in g.
    pub magnitude: f32,
    pub timestamp_ms: u32,
}

impl Sample {
    pub fn new(accel: [f32; 3], gyro: Option<[f32; 3]>, timestamp_ms: u32) -> Self {
        Self {
            accel,
            gyro,
            magnitude: norm(accel),
            timestamp_ms,
        }
    }

    /// A sample carrying only a magnitude, as if measured along one axis.
    pub fn from_magnitude(magnitude: f32, timestamp_ms: u32) -> Self {
        Self::new([0.0, 0.0, magnitude], None, timestamp_ms)
    }

    /// Magnitude with gravity removed, in milli-g, as uploaded in sessions.
    pub fn net_milli_g(&self) -> i32 {
        ((self.magnitude - 1.0) * 1000.0).round() as i32
    }
}

pub fn norm(v: [f32; 3]) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    /// Daily step goal reached.
    Step,
    Seizure,
    Fall,
}

impl AlertKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Step    => "step goal",
            Self::Seizure => "seizure",
            Self::Fall    => "fall",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertEvent {
    pub kind: AlertKind,
    /// Fall: impact peak (g).  Seizure: peak burst magnitude (g).
    /// Step: fraction of the daily goal reached.
    pub severity: f32,
    pub timestamp_ms: u32,
}

// ---------------------------------------------------------------------------
// Remote commands - produced by the telemetry task, applied by the sensor loop
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Remote "find-me" flag was observed set.
    FindMe,
    /// Remote step counting switch changed.
    SetStepCounting(bool),
}

// ---------------------------------------------------------------------------
// UI Events - sent to the UI task via channel
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UiEvent {
    /// Redraw the monitoring/alert screen.
    Render(ScreenState),
    /// Blank the panel before powering down.
    PowerOff,
}
