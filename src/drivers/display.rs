// GuardBand - SSD1306 OLED Driver
//
// Screens are rendered by the core library into a page-ordered
// `FrameBuffer`; this driver only pushes that buffer over I2C.

use guardband::config::*;
use guardband::display::{self, FrameBuffer, ScreenState};

use super::{lock_bus, SharedBus};

const CONTROL_COMMAND: u8 = 0x00;
const CONTROL_DATA: u8 = 0x40;
/// Data bytes per I2C transaction (plus the control byte).
const DATA_CHUNK: usize = 128;

// 128x64, charge pump on, horizontal addressing.
const INIT_SEQUENCE: &[u8] = &[
    0xAE, // display off
    0xD5, 0x80, // clock divide
    0xA8, 0x3F, // multiplex 64
    0xD3, 0x00, // display offset
    0x40, // start line 0
    0x8D, 0x14, // charge pump on
    0x20, 0x00, // horizontal addressing
    0xA1, // segment remap
    0xC8, // COM scan descending
    0xDA, 0x12, // COM pins
    0x81, 0xCF, // contrast
    0xD9, 0xF1, // precharge
    0xDB, 0x40, // VCOMH deselect
    0xA4, // resume from RAM
    0xA6, // normal (not inverted)
    0xAF, // display on
];

pub struct OledDisplay {
    bus: SharedBus,
    frame: FrameBuffer,
}

impl OledDisplay {
    pub fn new(bus: SharedBus) -> Self {
        Self {
            bus,
            frame: FrameBuffer::new(),
        }
    }

    fn command(&self, bytes: &[u8]) -> anyhow::Result<()> {
        let mut bus = lock_bus(self.bus)?;
        for &byte in bytes {
            bus.write(I2C_ADDR_OLED, &[CONTROL_COMMAND, byte], I2C_TIMEOUT_TICKS)?;
        }
        Ok(())
    }

    pub fn init(&mut self) -> anyhow::Result<()> {
        self.command(INIT_SEQUENCE)?;
        self.frame.blank();
        self.flush()?;
        log::info!("SSD1306 initialised");
        Ok(())
    }

    /// Address probe; a missing panel is not fatal.
    pub fn is_connected(&self) -> bool {
        match lock_bus(self.bus) {
            Ok(mut bus) => bus.write(I2C_ADDR_OLED, &[CONTROL_COMMAND, 0xE3], I2C_TIMEOUT_TICKS).is_ok(),
            Err(_) => false,
        }
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        // Full-screen window: columns 0..127, pages 0..7.
        self.command(&[0x21, 0, (SCREEN_WIDTH - 1) as u8, 0x22, 0, (SCREEN_HEIGHT / 8 - 1) as u8])?;

        // The bus is released between chunks so an IMU read never waits for
        // more than one chunk.
        let mut packet = [0u8; DATA_CHUNK + 1];
        packet[0] = CONTROL_DATA;
        for chunk in self.frame.as_bytes().chunks(DATA_CHUNK) {
            packet[1..=chunk.len()].copy_from_slice(chunk);
            let mut bus = lock_bus(self.bus)?;
            bus.write(I2C_ADDR_OLED, &packet[..=chunk.len()], I2C_TIMEOUT_TICKS)?;
        }
        Ok(())
    }

    pub fn show(&mut self, state: &ScreenState) -> anyhow::Result<()> {
        let _ = display::render(&mut self.frame, state);
        self.flush()
    }

    pub fn show_message(&mut self, title: &str, detail: Option<&str>) -> anyhow::Result<()> {
        let _ = display::render_message(&mut self.frame, title, detail);
        self.flush()
    }

    pub fn show_boot_status(&mut self, oled_ok: bool, imu_ok: bool) -> anyhow::Result<()> {
        let _ = display::render_boot_status(&mut self.frame, oled_ok, imu_ok);
        self.flush()
    }

    pub fn turn_off(&mut self) -> anyhow::Result<()> {
        self.frame.blank();
        self.flush()?;
        self.command(&[0xAE])
    }
}
