// GuardBand - UI Task
//
// Owns the OLED.  Blocks on the UI channel and redraws whatever screen state
// the sensor task last sent, so the slow I2C flush never stalls sampling.

use std::sync::mpsc::Receiver;

use guardband::events::UiEvent;

use crate::drivers::display::OledDisplay;

pub fn ui_task(mut display: OledDisplay, ui_rx: Receiver<UiEvent>) {
    log::info!("UI task started");

    while let Ok(mut event) = ui_rx.recv() {
        // Only the newest screen matters if several queued up during a flush.
        while let Ok(next) = ui_rx.try_recv() {
            if event == UiEvent::PowerOff {
                break;
            }
            event = next;
        }

        match event {
            UiEvent::Render(screen) => {
                if let Err(e) = display.show(&screen) {
                    log::warn!("Display flush failed: {}", e);
                }
            }
            UiEvent::PowerOff => {
                if let Err(e) = display.turn_off() {
                    log::warn!("Display power-off failed: {}", e);
                }
                break;
            }
        }
    }

    log::info!("UI task stopped");
}
