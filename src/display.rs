// GuardBand - Screen Rendering
//
// `ScreenState` is everything the OLED shows.  Rendering goes through
// embedded-graphics into any binary-colour draw target; the firmware draws
// into a `FrameBuffer` laid out the way the SSD1306 expects (8-pixel
// vertical pages) and flushes it over I2C from the UI task.

use core::convert::Infallible;
use core::fmt::Write;

use embedded_graphics::mono_font::ascii::{FONT_10X20, FONT_6X10};
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
use embedded_graphics::text::{Alignment, Baseline, Text};

use crate::alert::ScreenMode;
use crate::config::*;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenState {
    pub mode: ScreenMode,
    pub steps: u32,
    pub cadence_spm: Option<f32>,
    pub step_counting_enabled: bool,
}

// ---------------------------------------------------------------------------
// SSD1306 frame buffer
// ---------------------------------------------------------------------------
pub struct FrameBuffer {
    buf: [u8; DISPLAY_BUFFER_SIZE],
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            buf: [0; DISPLAY_BUFFER_SIZE],
        }
    }

    pub fn blank(&mut self) {
        self.buf.fill(0);
    }

    /// Raw page-ordered bytes, ready for a GDDRAM write.
    pub fn as_bytes(&self) -> &[u8; DISPLAY_BUFFER_SIZE] {
        &self.buf
    }

    pub fn pixel(&self, x: u32, y: u32) -> bool {
        if x >= SCREEN_WIDTH || y >= SCREEN_HEIGHT {
            return false;
        }
        let (idx, bit) = Self::locate(x, y);
        self.buf[idx] & (1 << bit) != 0
    }

    pub fn lit_pixels(&self) -> u32 {
        self.buf.iter().map(|b| b.count_ones()).sum()
    }

    fn locate(x: u32, y: u32) -> (usize, u32) {
        ((x + (y / 8) * SCREEN_WIDTH) as usize, y % 8)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OriginDimensions for FrameBuffer {
    fn size(&self) -> Size {
        Size::new(SCREEN_WIDTH, SCREEN_HEIGHT)
    }
}

impl DrawTarget for FrameBuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x < 0 || point.y < 0 {
                continue;
            }
            let (x, y) = (point.x as u32, point.y as u32);
            if x >= SCREEN_WIDTH || y >= SCREEN_HEIGHT {
                continue;
            }
            let (idx, bit) = Self::locate(x, y);
            if color.is_on() {
                self.buf[idx] |= 1 << bit;
            } else {
                self.buf[idx] &= !(1 << bit);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Screens
// ---------------------------------------------------------------------------
pub fn render<D>(target: &mut D, state: &ScreenState) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    match state.mode {
        ScreenMode::Monitoring => render_monitoring(target, state),
        ScreenMode::SeizureAlert => render_alert(target, "SEIZURE", "motion alert"),
        ScreenMode::FallAlert => render_alert(target, "FALL", "press to dismiss"),
    }
}

fn render_monitoring<D>(target: &mut D, state: &ScreenState) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    target.clear(BinaryColor::Off)?;
    let small = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);
    let big = MonoTextStyle::new(&FONT_10X20, BinaryColor::On);

    Text::with_baseline("STEPS", Point::new(0, 0), small, Baseline::Top).draw(target)?;

    let mut line: heapless::String<24> = heapless::String::new();
    let _ = write!(line, "{}", state.steps);
    Text::with_baseline(&line, Point::new(0, 14), big, Baseline::Top).draw(target)?;

    line.clear();
    if !state.step_counting_enabled {
        let _ = line.push_str("counting off");
    } else if let Some(cadence) = state.cadence_spm {
        let _ = write!(line, "{:.0} steps/min", cadence);
    } else {
        let _ = line.push_str("-- steps/min");
    }
    Text::with_baseline(&line, Point::new(0, 44), small, Baseline::Top).draw(target)?;
    Ok(())
}

/// Inverted full-screen alert.
fn render_alert<D>(target: &mut D, title: &str, detail: &str) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    let area = target.bounding_box();
    area.into_styled(PrimitiveStyle::with_fill(BinaryColor::On)).draw(target)?;
    let center = area.center();
    let big = MonoTextStyle::new(&FONT_10X20, BinaryColor::Off);
    let small = MonoTextStyle::new(&FONT_6X10, BinaryColor::Off);
    Text::with_alignment(title, center - Point::new(0, 6), big, Alignment::Center).draw(target)?;
    Text::with_alignment(detail, center + Point::new(0, 16), small, Alignment::Center).draw(target)?;
    Ok(())
}

/// Plain centred message (boot splash, self-test result, fatal errors).
pub fn render_message<D>(target: &mut D, title: &str, detail: Option<&str>) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    target.clear(BinaryColor::Off)?;
    let area = target.bounding_box();
    let center = area.center();
    let big = MonoTextStyle::new(&FONT_10X20, BinaryColor::On);
    Text::with_alignment(title, center, big, Alignment::Center).draw(target)?;
    if let Some(detail) = detail {
        let small = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);
        Text::with_alignment(detail, center + Point::new(0, 18), small, Alignment::Center).draw(target)?;
    }
    Ok(())
}

/// Outline used by the boot self-test screen.
pub fn render_boot_status<D>(target: &mut D, oled_ok: bool, imu_ok: bool) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    target.clear(BinaryColor::Off)?;
    let style = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);
    let mark = |ok: bool| if ok { "OK" } else { "FAIL" };
    let mut line: heapless::String<24> = heapless::String::new();
    let _ = write!(line, "OLED  {}", mark(oled_ok));
    Text::with_baseline(&line, Point::new(8, 16), style, Baseline::Top).draw(target)?;
    line.clear();
    let _ = write!(line, "IMU   {}", mark(imu_ok));
    Text::with_baseline(&line, Point::new(8, 32), style, Baseline::Top).draw(target)?;
    Rectangle::new(Point::new(0, 8), Size::new(SCREEN_WIDTH, 40))
        .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 1))
        .draw(target)?;
    Ok(())
}
