// GuardBand - Buzzer / Haptic Motor Driver
//
// Level-driven GPIO output.  Timing comes from the alert dispatcher's pulse
// scheduler; this driver only mirrors the requested level and never sleeps.

use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};

pub struct HapticDriver<'d> {
    pin: PinDriver<'d, AnyOutputPin, Output>,
    on: bool,
}

impl<'d> HapticDriver<'d> {
    pub fn new(mut pin: PinDriver<'d, AnyOutputPin, Output>) -> Self {
        let _ = pin.set_low();
        Self { pin, on: false }
    }

    /// Drive the output; the pin is only touched on a level change.
    pub fn set(&mut self, on: bool) {
        if on == self.on {
            return;
        }
        let result = if on { self.pin.set_high() } else { self.pin.set_low() };
        match result {
            Ok(()) => self.on = on,
            Err(e) => log::warn!("Buzzer GPIO write failed: {}", e),
        }
    }
}
