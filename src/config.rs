// GuardBand - Hardware & System Configuration
// Target: Seeed Studio Xiao ESP32-C3 (RISC-V) + MPU6050 + SSD1306
//
// Every tunable lives here.  Detector thresholds are grouped into the
// `*Config` structs of their modules, whose `Default` reads these constants;
// a deployment overrides individual fields rather than editing the detectors.

// ---------------------------------------------------------------------------
// GPIO Pin Definitions (Xiao ESP32-C3 pinout)
// ---------------------------------------------------------------------------
pub const PIN_BUTTON: i32 = 3;      // D1/A1 - User button (INPUT_PULLUP, active LOW)
pub const PIN_BUZZER: i32 = 4;      // D2/A2 - Haptic motor / buzzer control
pub const PIN_I2C_SDA: i32 = 6;     // D4    - I2C data line
pub const PIN_I2C_SCL: i32 = 7;     // D5    - I2C clock line

// ---------------------------------------------------------------------------
// I2C Bus
// ---------------------------------------------------------------------------
pub const I2C_ADDR_MPU6050: u8 = 0x68;
pub const I2C_ADDR_OLED: u8 = 0x3C;
pub const I2C_TIMEOUT_TICKS: u32 = 1000; // FreeRTOS ticks

// ---------------------------------------------------------------------------
// Display (SSD1306 OLED)
// ---------------------------------------------------------------------------
pub const SCREEN_WIDTH: u32 = 128;
pub const SCREEN_HEIGHT: u32 = 64;
pub const DISPLAY_BUFFER_SIZE: usize = (SCREEN_WIDTH as usize * SCREEN_HEIGHT as usize) / 8; // 1024

// ---------------------------------------------------------------------------
// Task Stack Sizes (bytes)
// ---------------------------------------------------------------------------
pub const STACK_SENSOR: usize = 8192;
pub const STACK_UI: usize = 8192;
pub const STACK_TELEMETRY: usize = 12288; // TLS + JSON bodies

// ---------------------------------------------------------------------------
// Timing (milliseconds)
// ---------------------------------------------------------------------------
pub const SENSOR_SAMPLE_INTERVAL_MS: u64 = 20;         // 50 Hz sampling loop
pub const SCREEN_REFRESH_MS: u32 = 1000;               // counters redraw, alerts redraw immediately
pub const DEBOUNCE_MS: u32 = 50;
pub const LONG_PRESS_MS: u32 = 3000;                   // 3-second hold -> power off
pub const BOOT_TEXT_DISPLAY_MS: u64 = 1000;            // Splash duration
pub const BOOT_STATUS_DISPLAY_MS: u64 = 1000;          // Self-test result duration

// ---------------------------------------------------------------------------
// MPU6050 Sensor Scale Factors
// ---------------------------------------------------------------------------
pub const ACCEL_SCALE_2G: f32 = 16384.0;  // LSB/g    at +-2 g
pub const GYRO_SCALE_250: f32 = 131.0;    // LSB/deg/s at +-250 deg/s

// ---------------------------------------------------------------------------
// Signal Conditioner
// ---------------------------------------------------------------------------
/// Process noise.  Larger tracks motion faster, smooths less.
pub const KALMAN_Q: f32 = 0.01;
/// Measurement noise of the MPU6050 at 21 Hz DLPF, in g^2 scale units.
pub const KALMAN_R: f32 = 0.5;
pub const KALMAN_INITIAL_P: f32 = 1.0;
/// The latest firmware generation feeds raw scaled values to the detectors;
/// smoothing lags free-fall/impact edges by several samples at 50 Hz.
pub const FILTERING_ENABLED: bool = false;
pub const SAMPLE_HISTORY_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Step Detector (magnitudes in g)
// ---------------------------------------------------------------------------
/// Wrist unloading after heel strike dips below this.  Valid 0.7..0.95.
pub const STEP_LOW_PEAK_G: f32 = 0.85;
/// Quiescent "stance" band the magnitude returns to after a step impulse.
pub const STEP_STANCE_MIN_G: f32 = 0.95;
pub const STEP_STANCE_MAX_G: f32 = 1.05;
/// Dual-threshold policy: heel strike peak.  Valid 1.1..1.6.
pub const STEP_HIGH_PEAK_G: f32 = 1.2;
/// Dual-threshold policy: fastest plausible step rate (~3.3 steps/s).
pub const STEP_MIN_INTERVAL_MS: u32 = 300;
/// Longer per-step gaps mean walking stopped; they are kept out of cadence.
pub const MAX_STEP_INTERVAL_MS: u32 = 2000;
pub const CADENCE_WINDOW: usize = 20;
pub const CADENCE_UPDATE_EVERY: u32 = 4;
pub const DAILY_STEP_GOAL: u32 = 10_000;
pub const ACTIVE_MINUTE_MIN_STEPS: u32 = 30;

// ---------------------------------------------------------------------------
// Seizure Detector
// ---------------------------------------------------------------------------
/// Burst threshold.  Must sit inside the sensor range, valid 1.5..3.4 g.
pub const SEIZURE_THRESHOLD_G: f32 = 2.0;
pub const SEIZURE_MIN_DURATION_MS: u32 = 5000;
pub const SEIZURE_MIN_BURSTS: u32 = 20;
/// Quiet time that ends an accumulation window without an alert.
pub const SEIZURE_RESET_TIMEOUT_MS: u32 = 1500;

// ---------------------------------------------------------------------------
// Fall Detector
// ---------------------------------------------------------------------------
/// Near weightlessness.  Must be < 1 g, valid 0.3..0.6.
pub const FALL_FREE_FALL_G: f32 = 0.5;
/// Ground impact.  Must be > 1 g, valid 1.5..3.0.
pub const FALL_IMPACT_G: f32 = 1.8;
/// Lying still under normal gravity.
pub const FALL_STILLNESS_MIN_G: f32 = 0.9;
pub const FALL_STILLNESS_MAX_G: f32 = 1.1;
/// Minimum free-fall time before a spike counts as impact (rejects glitches).
pub const FALL_MIN_SETTLE_MS: u32 = 60;
pub const FALL_FREE_FALL_TIMEOUT_MS: u32 = 1300;
/// Time allowed after impact for the wearer to come to rest.
pub const FALL_IMPACT_TIMEOUT_MS: u32 = 3000;
pub const FALL_CONFIRM_COUNT: u32 = 10;
pub const FALL_MIN_STILLNESS_MS: u32 = 150;

// ---------------------------------------------------------------------------
// Alert Dispatcher
// ---------------------------------------------------------------------------
pub const SEIZURE_ALERT_SCREEN_MS: u32 = 10_000;
pub const FALL_ALERT_SCREEN_MS: u32 = 30_000;
pub const EVENT_LOG_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------
pub const TELEMETRY_INTERVAL_MS: u32 = 15_000;
pub const TELEMETRY_POLL_MS: u64 = 250;              // telemetry task wake-up
/// Every Nth sample goes into the uploaded session batch (50 Hz -> 10 Hz).
pub const SAMPLE_UPLOAD_DECIMATION: u32 = 5;
pub const SAMPLE_BATCH_CAPACITY: usize = 256;
pub const PERSIST_INTERVAL_MS: u32 = 60_000;

pub const PATH_STEP_COUNT: &str = "status/steps";
pub const PATH_STEP_COUNTING_MIRROR: &str = "status/stepCounting";
pub const PATH_STEP_COUNTING_CONTROL: &str = "control/stepCounting";
pub const PATH_FIND_ME: &str = "control/findMe";
pub const PATH_SESSIONS: &str = "sessions";

/// REST key-value store root and network credentials, baked in at build time.
pub const REMOTE_BASE_URL: &str = match option_env!("GUARDBAND_REMOTE_URL") {
    Some(url) => url,
    None => "",
};
pub const REMOTE_AUTH_TOKEN: &str = match option_env!("GUARDBAND_REMOTE_TOKEN") {
    Some(token) => token,
    None => "",
};
pub const WIFI_SSID: &str = match option_env!("GUARDBAND_WIFI_SSID") {
    Some(ssid) => ssid,
    None => "",
};
pub const WIFI_PASSWORD: &str = match option_env!("GUARDBAND_WIFI_PASS") {
    Some(pass) => pass,
    None => "",
};

// ---------------------------------------------------------------------------
// Persisted daily record
// ---------------------------------------------------------------------------
pub const RECORD_OFFSET: usize = 0;
pub const RECORD_LEN: usize = 16;
pub const RECORD_MAGIC: u16 = 0x4742; // "GB"
pub const RECORD_VERSION: u8 = 1;
pub const MAX_PLAUSIBLE_STEPS: u32 = 200_000;
pub const MAX_ACTIVE_MINUTES: u16 = 1440;
pub const MAX_SLEEP_QUALITY: u8 = 100;
pub const NVS_NAMESPACE: &str = "guardband";
pub const NVS_RECORD_KEY: &str = "daily";
pub const NVS_REGION_LEN: usize = 32;
