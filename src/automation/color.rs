//! Pixel color classification for tools that report status by repainting a
//! control instead of exposing completion state.
//!
//! The reference colors match the common WinForms randomizer palette
//! (PaleGreen for success, IndianRed for failure); both rules are plain data
//! so deployments can override them in the settings file when a tool ships
//! with a different theme.

use crate::automation::window::{WindowId, WindowService};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 24-bit color sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn brightness(&self) -> u8 {
        ((self.r as u16 + self.g as u16 + self.b as u16) / 3) as u8
    }

    /// Near-black or near-white samples are text and border pixels, not the
    /// control's fill color.
    pub fn is_text_color(&self) -> bool {
        let brightness = self.brightness();
        brightness < 50 || brightness > 240
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Red,
    Green,
    Blue,
}

/// One target color with its match conditions.
///
/// A sample matches when every channel is within `tolerance` of the
/// reference, or when the dominant channel clearly leads the other two. The
/// dominance fallback catches themed variants of the reference color that
/// drift outside the tolerance box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorRule {
    pub reference: Rgb,
    pub tolerance: u8,
    pub dominant: Channel,
    pub dominance_margin: u8,
    pub dominance_floor: u8,
}

impl ColorRule {
    /// PaleGreen, the stock success fill.
    pub fn success_green() -> Self {
        Self {
            reference: Rgb::new(152, 251, 152),
            tolerance: 20,
            dominant: Channel::Green,
            dominance_margin: 50,
            dominance_floor: 150,
        }
    }

    /// IndianRed, the stock failure fill.
    pub fn failure_red() -> Self {
        Self {
            reference: Rgb::new(205, 92, 92),
            tolerance: 20,
            dominant: Channel::Red,
            dominance_margin: 50,
            dominance_floor: 150,
        }
    }

    /// Looser green rule for scanning rendered text rather than a solid fill.
    pub fn green_text() -> Self {
        Self {
            reference: Rgb::new(152, 251, 152),
            tolerance: 20,
            dominant: Channel::Green,
            dominance_margin: 10,
            dominance_floor: 120,
        }
    }

    pub fn matches(&self, color: Rgb) -> bool {
        let near = |sample: u8, reference: u8| sample.abs_diff(reference) <= self.tolerance;
        if near(color.r, self.reference.r)
            && near(color.g, self.reference.g)
            && near(color.b, self.reference.b)
        {
            return true;
        }

        let (lead, other_a, other_b) = match self.dominant {
            Channel::Red => (color.r, color.g, color.b),
            Channel::Green => (color.g, color.r, color.b),
            Channel::Blue => (color.b, color.r, color.g),
        };
        // Both margins must hold; a channel that barely beats one of the
        // others is not a colored fill.
        lead > self.dominance_floor
            && lead.saturating_sub(other_a) > self.dominance_margin
            && lead.saturating_sub(other_b) > self.dominance_margin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorVerdict {
    Success,
    Failure,
}

/// Pairs the success and failure rules and reads control backgrounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorClassifier {
    #[serde(default = "ColorRule::success_green")]
    pub success: ColorRule,
    #[serde(default = "ColorRule::failure_red")]
    pub failure: ColorRule,
}

impl Default for ColorClassifier {
    fn default() -> Self {
        Self {
            success: ColorRule::success_green(),
            failure: ColorRule::failure_red(),
        }
    }
}

impl ColorClassifier {
    pub fn classify(&self, color: Rgb) -> Option<ColorVerdict> {
        if self.success.matches(color) {
            Some(ColorVerdict::Success)
        } else if self.failure.matches(color) {
            Some(ColorVerdict::Failure)
        } else {
            None
        }
    }

    /// Dominant background color of a control, or `None` when every sampled
    /// pixel looks like text or the control has no usable rectangle.
    pub fn read_background(ws: &dyn WindowService, window: WindowId) -> Option<Rgb> {
        let rect = ws.window_rect(window)?;
        let (w, h) = (rect.width(), rect.height());
        if w <= 0 || h <= 0 {
            return None;
        }

        // Edge midpoints, center strips, and quarter points; enough spread to
        // outvote a label drawn over the fill.
        let regions: [(i32, i32, i32, i32); 6] = [
            (5, h / 2, 20, 5),
            (w - 25, h / 2, 20, 5),
            (w / 2, 2, 20, 3),
            (w / 2, h - 3, 20, 2),
            (w / 4, h / 2, 10, 3),
            (3 * w / 4, h / 2, 10, 3),
        ];

        let mut votes: HashMap<Rgb, u32> = HashMap::new();
        for (cx, cy, rw, rh) in regions {
            for y in cy..cy + rh {
                for x in cx..cx + rw {
                    if x < 0 || y < 0 || x >= w || y >= h {
                        continue;
                    }
                    if let Some(color) = ws.pixel_at(window, x, y) {
                        if !color.is_text_color() {
                            *votes.entry(color).or_insert(0) += 1;
                        }
                    }
                }
            }
        }

        votes
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(color, _)| color)
    }

    pub fn classify_window(&self, ws: &dyn WindowService, window: WindowId) -> Option<ColorVerdict> {
        Self::read_background(ws, window).and_then(|color| self.classify(color))
    }

    /// Strided scan of the window's bottom band for any pixel matching the
    /// rule. Short-circuits on the first hit; a `stride` of 8 keeps the cost
    /// of a miss at a few hundred pixel reads.
    pub fn scan_band(
        ws: &dyn WindowService,
        window: WindowId,
        rule: &ColorRule,
        band_height: i32,
        max_width: i32,
        stride: u32,
    ) -> bool {
        let Some(rect) = ws.window_rect(window) else {
            return false;
        };
        let (w, h) = (rect.width(), rect.height());
        if w <= 0 || h <= 0 {
            return false;
        }

        let start_y = (h - band_height).max(0);
        let width = w.min(max_width);
        let stride = stride.max(1) as usize;
        for y in (start_y..h).step_by(stride) {
            for x in (0..width).step_by(stride) {
                if let Some(color) = ws.pixel_at(window, x, y) {
                    if rule.matches(color) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::window::Rect;
    use crate::automation::window::fake::FakeWindowService;

    #[test]
    fn test_reference_colors_classify() {
        let classifier = ColorClassifier::default();
        assert_eq!(
            classifier.classify(Rgb::new(152, 251, 152)),
            Some(ColorVerdict::Success)
        );
        assert_eq!(
            classifier.classify(Rgb::new(205, 92, 92)),
            Some(ColorVerdict::Failure)
        );
        assert_eq!(classifier.classify(Rgb::new(0, 0, 0)), None);
        assert_eq!(classifier.classify(Rgb::new(240, 240, 240)), None);
    }

    #[test]
    fn test_tolerance_box() {
        let rule = ColorRule::success_green();
        assert!(rule.matches(Rgb::new(152 + 20, 251 - 20, 152 - 20)));
        assert!(!rule.matches(Rgb::new(152, 251 - 120, 152)));
    }

    #[test]
    fn test_dominance_fallback() {
        // Saturated green far outside the PaleGreen box still reads success.
        let rule = ColorRule::success_green();
        assert!(rule.matches(Rgb::new(40, 200, 40)));
        // Dominant but below the floor does not.
        assert!(!rule.matches(Rgb::new(40, 140, 40)));
        // Dominant without the margin over either other channel does not.
        assert!(!rule.matches(Rgb::new(180, 200, 190)));
    }

    #[test]
    fn test_dominance_needs_the_margin_over_both_channels() {
        let rule = ColorRule::green_text();
        // Olive-ish text: green crushes blue but barely beats red, so it is
        // not a green fill.
        assert!(!rule.matches(Rgb::new(205, 211, 40)));
        assert!(rule.matches(Rgb::new(100, 211, 40)));
    }

    #[test]
    fn test_text_pixels_ignored_when_sampling() {
        let ws = FakeWindowService::new();
        let main = ws.add_window(Some(1), "t", Rect::new(0, 0, 400, 300));
        let status = ws.add_child(main, "msctls_statusbar32", "done", Rect::new(0, 270, 400, 300));
        ws.set_background(status, Rgb::new(152, 251, 152));
        // Black label pixels inside a sampled region must not win the vote.
        for x in 5..25 {
            ws.set_pixel(status, x, 16, Rgb::new(0, 0, 0));
        }

        let background = ColorClassifier::read_background(&ws, status);
        assert_eq!(background, Some(Rgb::new(152, 251, 152)));
    }

    #[test]
    fn test_scan_band_hits_on_stride() {
        let ws = FakeWindowService::new();
        let main = ws.add_window(Some(1), "t", Rect::new(0, 0, 600, 400));
        // One green pixel on the stride grid inside the bottom band.
        ws.set_pixel(main, 64, 348, Rgb::new(152, 251, 152));

        let rule = ColorRule::green_text();
        assert!(ColorClassifier::scan_band(&ws, main, &rule, 60, 400, 8));
    }

    #[test]
    fn test_scan_band_respects_width_cap() {
        let ws = FakeWindowService::new();
        let main = ws.add_window(Some(1), "t", Rect::new(0, 0, 600, 400));
        // Green pixel beyond the capped width is never sampled.
        ws.set_pixel(main, 480, 348, Rgb::new(152, 251, 152));

        let rule = ColorRule::green_text();
        assert!(!ColorClassifier::scan_band(&ws, main, &rule, 60, 400, 8));
    }
}
