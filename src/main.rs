// GuardBand - Firmware Entry Point
//
// On ESP-IDF this is the wearable firmware.  Boot sequence:
//   1. Splash "GuardBand" for one second.
//   2. Self-test OLED and MPU6050.  A missing IMU halts on an error screen.
//   3. Restore the daily record from NVS (zeroed if absent or corrupt).
//   4. Bring up Wi-Fi.  Failure leaves the band working offline.
//   5. Spawn the sensor, UI and telemetry tasks.
//
// The device powers down when the wearer holds the button for 3 seconds.
//
// On any other target the binary is the session replay tool.

#[cfg(target_os = "espidf")]
mod drivers;
#[cfg(target_os = "espidf")]
mod tasks;

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    guardband::replay::run()
}

#[cfg(target_os = "espidf")]
use firmware::{enter_deep_sleep, now_ms};

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    firmware::main()
}

#[cfg(target_os = "espidf")]
mod firmware {
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use anyhow::anyhow;
    use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, IOPin, Input, Output, OutputPin, PinDriver, Pull};
    use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
    use esp_idf_hal::modem::Modem;
    use esp_idf_hal::prelude::*;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};

    use guardband::config::*;
    use guardband::monitor::{Monitor, MonitorConfig};
    use guardband::persist;

    use crate::drivers::display::OledDisplay;
    use crate::drivers::imu::Mpu6050;
    use crate::drivers::storage::NvsRecordStore;
    use crate::drivers::SharedBus;
    use crate::tasks;
    use crate::tasks::sensor::SensorTaskIo;
    use crate::tasks::telemetry::HttpSink;

    /// Milliseconds since boot (wraps at ~49 days, timeouts use wrapping math).
    pub fn now_ms() -> u32 {
        unsafe { (esp_idf_sys::esp_timer_get_time() / 1000) as u32 }
    }

    pub fn main() -> anyhow::Result<()> {
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
        log::info!("GuardBand firmware starting");

        let peripherals = Peripherals::take()?;
        let sys_loop = EspSystemEventLoop::take()?;
        let nvs_partition = EspDefaultNvsPartition::take()?;

        // ---- I2C bus (shared between OLED and MPU6050) --------------------
        let i2c_config = I2cConfig::new().baudrate(400u32.kHz().into());
        let i2c = I2cDriver::new(
            peripherals.i2c0,
            peripherals.pins.gpio6, // SDA
            peripherals.pins.gpio7, // SCL
            &i2c_config,
        )?;
        // SAFETY: the I2C peripheral is a singleton from `Peripherals::take()`
        // and lives for the whole programme (firmware never exits).
        let i2c_bus: SharedBus = Box::leak(Box::new(Mutex::new(unsafe {
            core::mem::transmute::<I2cDriver<'_>, I2cDriver<'static>>(i2c)
        })));

        // ---- Splash + self-test -------------------------------------------
        let mut display = OledDisplay::new(i2c_bus);
        if let Err(e) = display.init() {
            log::error!("OLED init failed: {}", e);
        }
        let _ = display.show_message("GuardBand", None);
        thread::sleep(Duration::from_millis(BOOT_TEXT_DISPLAY_MS));

        let oled_ok = display.is_connected();
        let imu = Mpu6050::new(i2c_bus);
        let imu_ok = imu.is_connected() && imu.init().is_ok();
        let _ = display.show_boot_status(oled_ok, imu_ok);
        thread::sleep(Duration::from_millis(BOOT_STATUS_DISPLAY_MS));

        if !imu_ok {
            log::error!("Boot check FAILED: IMU not responding (OLED ok: {})", oled_ok);
            let _ = display.show_message("SENSOR", Some("IMU not found"));
            halt();
        }
        if !oled_ok {
            log::warn!("OLED not responding, continuing headless");
        }

        // ---- Restore the daily record -------------------------------------
        let mut storage = NvsRecordStore::new(nvs_partition.clone())?;
        let restored = persist::load_or_default(&mut storage);
        let storage = Arc::new(Mutex::new(storage));
        let monitor = Monitor::new(MonitorConfig::default(), restored)?;

        // ---- Network ------------------------------------------------------
        let wifi = match connect_wifi(peripherals.modem, sys_loop, nvs_partition) {
            Ok(wifi) => Some(wifi),
            Err(e) => {
                log::warn!("Wi-Fi unavailable, running offline: {:#}", e);
                None
            }
        };
        let sink = if wifi.is_some() && !REMOTE_BASE_URL.is_empty() {
            match HttpSink::new(REMOTE_BASE_URL, REMOTE_AUTH_TOKEN) {
                Ok(sink) => Some(sink),
                Err(e) => {
                    log::warn!("HTTP client setup failed: {:#}", e);
                    None
                }
            }
        } else {
            None
        };
        let session_id = format!("{:08x}", unsafe { esp_idf_sys::esp_random() });

        // ---- GPIO ---------------------------------------------------------
        // Active LOW with internal pull-up.
        let mut button = PinDriver::input(peripherals.pins.gpio3.downgrade())?;
        button.set_pull(Pull::Up)?;
        // SAFETY: GPIO peripheral lives forever, same argument as I2C above.
        let button: PinDriver<'static, AnyIOPin, Input> = unsafe { core::mem::transmute(button) };
        let buzzer = PinDriver::output(peripherals.pins.gpio4.downgrade_output())?;
        let buzzer: PinDriver<'static, AnyOutputPin, Output> = unsafe { core::mem::transmute(buzzer) };

        // ---- Channels -----------------------------------------------------
        let (ui_tx, ui_rx) = mpsc::channel();
        let (telemetry_tx, telemetry_rx) = mpsc::channel();
        let (command_tx, command_rx) = mpsc::channel();

        // ---- Spawn tasks (FreeRTOS tasks via std::thread) -----------------
        thread::Builder::new()
            .name("ui".into())
            .stack_size(STACK_UI)
            .spawn(move || tasks::ui::ui_task(display, ui_rx))?;

        let telemetry_storage = Arc::clone(&storage);
        thread::Builder::new()
            .name("telemetry".into())
            .stack_size(STACK_TELEMETRY)
            .spawn(move || {
                tasks::telemetry::telemetry_task(sink, session_id, telemetry_storage, telemetry_rx, command_tx)
            })?;

        let io = SensorTaskIo {
            imu,
            button,
            buzzer,
            storage,
            ui_tx,
            telemetry_tx,
            command_rx,
        };
        thread::Builder::new()
            .name("sensor".into())
            .stack_size(STACK_SENSOR)
            .spawn(move || tasks::sensor::sensor_task(monitor, io))?;

        log::info!("Boot complete, monitoring");

        // Main thread keeps the Wi-Fi driver alive; all work is in the tasks.
        loop {
            thread::sleep(Duration::from_secs(60));
        }
    }

    fn connect_wifi(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
        anyhow::ensure!(!WIFI_SSID.is_empty(), "no SSID configured at build time");

        let mut wifi = BlockingWifi::wrap(EspWifi::new(modem, sys_loop.clone(), Some(nvs))?, sys_loop)?;
        let auth_method = if WIFI_PASSWORD.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: WIFI_SSID.try_into().map_err(|_| anyhow!("SSID too long"))?,
            password: WIFI_PASSWORD.try_into().map_err(|_| anyhow!("Wi-Fi password too long"))?,
            auth_method,
            ..Default::default()
        }))?;

        wifi.start()?;
        wifi.connect()?;
        wifi.wait_netif_up()?;
        log::info!("Wi-Fi connected to {}", WIFI_SSID);
        Ok(wifi)
    }

    /// Fatal boot error: the error screen stays up, nothing else runs.
    fn halt() -> ! {
        loop {
            thread::sleep(Duration::from_secs(60));
        }
    }

    /// Enter deep sleep with button-press wakeup.  Does not return.
    pub fn enter_deep_sleep() -> ! {
        log::info!("Entering deep sleep, wake on button press (GPIO{})", PIN_BUTTON);
        unsafe {
            esp_idf_sys::esp_deep_sleep_enable_gpio_wakeup(
                1u64 << PIN_BUTTON,
                esp_idf_sys::esp_deepsleep_gpio_wake_up_mode_t_ESP_GPIO_WAKEUP_GPIO_LOW,
            );
            esp_idf_sys::esp_deep_sleep_start();
        }
    }
}
