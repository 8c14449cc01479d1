// GuardBand - Sensor Task
//
// The 50 Hz sampling loop: read the IMU, run the monitor, drive the buzzer,
// poll the button and apply remote commands.  Display flushes and network
// I/O happen in other tasks; the only blocking call here is the period sleep.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, Input, Output, PinDriver};

use guardband::config::*;
use guardband::events::{RemoteCommand, UiEvent};
use guardband::input::{ButtonEvent, ButtonTracker};
use guardband::monitor::Monitor;
use guardband::persist;
use guardband::telemetry::TelemetryUpdate;

use crate::drivers::haptic::HapticDriver;
use crate::drivers::imu::Mpu6050;
use crate::drivers::storage::NvsRecordStore;

pub struct SensorTaskIo {
    pub imu: Mpu6050,
    pub button: PinDriver<'static, AnyIOPin, Input>,
    pub buzzer: PinDriver<'static, AnyOutputPin, Output>,
    pub storage: Arc<Mutex<NvsRecordStore>>,
    pub ui_tx: Sender<UiEvent>,
    pub telemetry_tx: Sender<TelemetryUpdate>,
    pub command_rx: Receiver<RemoteCommand>,
}

pub fn sensor_task(mut monitor: Monitor, io: SensorTaskIo) {
    log::info!("Sensor task started");

    let SensorTaskIo {
        imu,
        button,
        buzzer,
        storage,
        ui_tx,
        telemetry_tx,
        command_rx,
    } = io;

    let mut haptic = HapticDriver::new(buzzer);
    let mut tracker = ButtonTracker::new(crate::now_ms());
    let mut telemetry_open = true;
    let interval = Duration::from_millis(SENSOR_SAMPLE_INTERVAL_MS);

    loop {
        let tick_start = Instant::now();
        let now = crate::now_ms();

        while let Ok(command) = command_rx.try_recv() {
            monitor.apply_command(command, now);
        }

        // Button is active LOW with pull-up.
        match tracker.update(button.is_low(), now) {
            Some(ButtonEvent::LongPress) => {
                power_off(&monitor, &storage, &ui_tx, &mut haptic);
            }
            Some(event) => monitor.on_button(event),
            None => {}
        }

        let buzzer_on = match imu.read_raw() {
            Ok(raw) => {
                let report = monitor.tick(&raw, now);
                if telemetry_open {
                    for update in report.telemetry {
                        if telemetry_tx.send(update).is_err() {
                            log::warn!("Telemetry channel closed, uploads stopped");
                            telemetry_open = false;
                            break;
                        }
                    }
                }
                report.buzzer_on
            }
            Err(e) => {
                log::warn!("IMU read error, sample skipped: {}", e);
                monitor.skip_sample(now)
            }
        };
        haptic.set(buzzer_on);

        if let Some(screen) = monitor.screen_update(now) {
            let _ = ui_tx.send(UiEvent::Render(screen));
        }

        // Sleep for the remainder of the sampling interval to hold 50 Hz.
        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}

/// Long press: save the day's counters, blank the panel, deep sleep.
fn power_off(
    monitor: &Monitor,
    storage: &Arc<Mutex<NvsRecordStore>>,
    ui_tx: &Sender<UiEvent>,
    haptic: &mut HapticDriver<'static>,
) -> ! {
    log::info!("Long press detected, powering off");
    haptic.set(false);

    match storage.lock() {
        Ok(mut store) => {
            if let Err(e) = persist::save(&mut *store, &monitor.daily()) {
                log::error!("Saving daily record before power-off failed: {:#}", e);
            }
        }
        Err(_) => log::error!("Storage mutex poisoned, record not saved"),
    }

    let _ = ui_tx.send(UiEvent::PowerOff);
    // Give the UI task time to blank the panel.
    thread::sleep(Duration::from_millis(200));
    crate::enter_deep_sleep()
}
