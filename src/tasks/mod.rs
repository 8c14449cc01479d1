// GuardBand - FreeRTOS Tasks (std::thread on ESP-IDF)

pub mod sensor;
pub mod telemetry;
pub mod ui;
