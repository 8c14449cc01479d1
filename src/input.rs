// GuardBand - Button Input Tracker
//
// Debounced button handler with click and long-press detection.  Fed the raw
// pin level once per sampling tick; the caller owns the GPIO.

use crate::config::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// Short press: acknowledge the active alert.
    Click,
    /// Held for at least `LONG_PRESS_MS`: power off.
    LongPress,
}

pub struct ButtonTracker {
    // Debounce state
    last_raw: bool,
    last_change_ms: u32,

    // Press tracking
    press_start_ms: Option<u32>,
    button_down: bool,
}

impl ButtonTracker {
    pub fn new(now_ms: u32) -> Self {
        Self {
            last_raw: false,
            last_change_ms: now_ms,
            press_start_ms: None,
            button_down: false,
        }
    }

    /// `pressed` is the raw (undebounced) level, true while held down.
    pub fn update(&mut self, pressed: bool, now_ms: u32) -> Option<ButtonEvent> {
        // ---- debounce filter ----
        if pressed != self.last_raw {
            self.last_change_ms = now_ms;
        }
        self.last_raw = pressed;

        if now_ms.wrapping_sub(self.last_change_ms) < DEBOUNCE_MS {
            // Signal still bouncing - wait.
            return None;
        }

        // ---- button pressed edge ----
        if pressed && !self.button_down {
            self.button_down = true;
            self.press_start_ms = Some(now_ms);
            return None;
        }

        // ---- button released edge ----
        if !pressed && self.button_down {
            self.button_down = false;
            let hold_ms = self
                .press_start_ms
                .take()
                .map(|t| now_ms.wrapping_sub(t))
                .unwrap_or(0);
            return Some(if hold_ms >= LONG_PRESS_MS {
                ButtonEvent::LongPress
            } else {
                ButtonEvent::Click
            });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(tracker: &mut ButtonTracker, levels: &[(bool, u32)], t0: u32) -> (Vec<ButtonEvent>, u32) {
        let mut events = Vec::new();
        let mut t = t0;
        for &(level, duration) in levels {
            let end = t + duration;
            while t < end {
                events.extend(tracker.update(level, t));
                t += 10;
            }
        }
        (events, t)
    }

    #[test]
    fn test_click() {
        let mut b = ButtonTracker::new(0);
        let (events, _) = drive(&mut b, &[(false, 100), (true, 200), (false, 100)], 0);
        assert_eq!(events, vec![ButtonEvent::Click]);
    }

    #[test]
    fn test_long_press() {
        let mut b = ButtonTracker::new(0);
        let (events, _) = drive(&mut b, &[(false, 100), (true, LONG_PRESS_MS + 200), (false, 100)], 0);
        assert_eq!(events, vec![ButtonEvent::LongPress]);
    }

    #[test]
    fn test_bounce_is_filtered() {
        let mut b = ButtonTracker::new(0);
        // 30 ms of chatter never settles long enough to register.
        let (events, t) = drive(&mut b, &[(true, 10), (false, 10), (true, 10), (false, 200)], 0);
        assert!(events.is_empty());
        let (events, _) = drive(&mut b, &[(true, 120), (false, 100)], t);
        assert_eq!(events, vec![ButtonEvent::Click]);
    }
}
