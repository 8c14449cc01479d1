// GuardBand - Core Library
//
// Everything that does not touch hardware: signal conditioning, the three
// detectors, alert dispatch, display rendering, telemetry scheduling, the
// persisted record and the button tracker.  The firmware binary wires these
// to ESP-IDF drivers; the host build replays recorded sessions through them.

pub mod alert;
pub mod config;
pub mod display;
pub mod events;
pub mod fall;
pub mod filter;
pub mod input;
pub mod monitor;
pub mod persist;
#[cfg(not(target_os = "espidf"))]
pub mod replay;
pub mod seizure;
pub mod step;
pub mod telemetry;


/// True once `now` has reached `deadline` on the wrapping millisecond clock.
///
/// Valid while the two are less than ~24 days apart.
pub fn deadline_reached(now: u32, deadline: u32) -> bool {
    (now.wrapping_sub(deadline) as i32) >= 0
}
