//! Anomaly overlays.

use std::sync::OnceLock;

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;

use frameforge_report_model::{AnomalyEvent, AnomalyKind, Severity};

pub const FRAME_DROP_COLOUR: Rgb<u8> = Rgb([220, 38, 38]);
pub const MOTION_STUTTER_COLOUR: Rgb<u8> = Rgb([245, 158, 11]);
pub const BLUR_SPIKE_COLOUR: Rgb<u8> = Rgb([37, 99, 235]);
pub const NORMAL_COLOUR: Rgb<u8> = Rgb([34, 197, 94]);
pub const LABEL_COLOUR: Rgb<u8> = Rgb([255, 255, 255]);

static FONT_BYTES: &[u8] = include_bytes!("../assets/DejaVuSans-Bold.ttf");

/// The embedded label font. `None` only if the bundled file fails to parse.
fn label_font() -> Option<&'static FontRef<'static>> {
    static FONT: OnceLock<Option<FontRef<'static>>> = OnceLock::new();
    FONT.get_or_init(|| match FontRef::try_from_slice(FONT_BYTES) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!("Overlay font unavailable, drawing labels as blocks: {e}");
            None
        }
    })
    .as_ref()
}

/// Banner caption, e.g. `[FrameDrop] Frame 135 | T=4.50s`.
pub fn banner_text(event: &AnomalyEvent) -> String {
    format!(
        "[{}] Frame {} | T={:.2}s",
        event.kind, event.frame_index, event.timestamp
    )
}

/// Badge caption, e.g. `Severity: High`.
pub fn badge_text(event: &AnomalyEvent) -> String {
    format!("Severity: {}", event.severity.as_str())
}

pub fn colour_for(kind: AnomalyKind) -> Rgb<u8> {
    match kind {
        AnomalyKind::FrameDrop => FRAME_DROP_COLOUR,
        AnomalyKind::MotionStutter => MOTION_STUTTER_COLOUR,
        AnomalyKind::BlurSpike => BLUR_SPIKE_COLOUR,
    }
}

/// Which event, if any, is on screen at a given time.
#[derive(Debug, Clone)]
pub struct OverlaySchedule {
    events: Vec<AnomalyEvent>,
    hold_secs: f64,
}

impl OverlaySchedule {
    /// `events` must be in timestamp order.
    pub fn new(events: Vec<AnomalyEvent>, hold_secs: f64) -> Self {
        Self {
            events,
            hold_secs: hold_secs.max(0.0),
        }
    }

    /// The most severe event whose `[timestamp, timestamp + hold]` window
    /// contains `t`; the latest one wins ties.
    pub fn active_at(&self, t: f64) -> Option<&AnomalyEvent> {
        let end = self.events.partition_point(|e| e.timestamp <= t);
        self.events[..end]
            .iter()
            .rev()
            .take_while(|e| t - e.timestamp <= self.hold_secs)
            .reduce(|best, e| if e.severity > best.severity { e } else { best })
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Draw the overlay for `event` (or the "normal" marker) onto `image`.
pub fn draw_overlay(image: &mut RgbImage, event: Option<&AnomalyEvent>) {
    let (width, height) = image.dimensions();
    if width < 4 || height < 4 {
        return;
    }
    let unit = (width.min(height) / 60).max(2);

    let Some(event) = event else {
        let radius = (unit * 2) as i32;
        let centre = ((width - unit * 4) as i32, (unit * 4) as i32);
        draw_filled_circle_mut(image, centre, radius, NORMAL_COLOUR);
        return;
    };

    let colour = colour_for(event.kind);

    // Border
    for inset in 0..unit {
        let w = width.saturating_sub(2 * inset);
        let h = height.saturating_sub(2 * inset);
        if w == 0 || h == 0 {
            break;
        }
        draw_hollow_rect_mut(
            image,
            Rect::at(inset as i32, inset as i32).of_size(w, h),
            colour,
        );
    }

    // Banner
    let banner_height = (unit * 6).min(height / 4).max(1);
    draw_filled_rect_mut(
        image,
        Rect::at(0, 0).of_size(width, banner_height),
        colour,
    );
    let font = label_font();
    if let Some(font) = font {
        let scale = PxScale::from(banner_height as f32 * 0.7);
        let inset = (banner_height as f32 * 0.15) as i32;
        draw_text_mut(
            image,
            LABEL_COLOUR,
            (unit * 2) as i32,
            inset,
            scale,
            font,
            &banner_text(event),
        );
    }

    // Severity badge, bottom-right
    let margin = unit * 2;
    let text_px = match event.severity {
        Severity::High => unit * 5,
        Severity::Medium => unit * 3,
    } as f32;
    let label = badge_text(event);
    let (badge_w, badge_h) = match font {
        Some(font) => {
            let (w, h) = text_size(PxScale::from(text_px), font, &label);
            (w + margin * 2, h + margin * 2)
        }
        None => {
            let side = (text_px as u32) * 2;
            (side, side)
        }
    };
    let badge_w = badge_w.min(width.saturating_sub(margin)).max(1);
    let badge_h = badge_h.min(height.saturating_sub(margin)).max(1);
    let x = width.saturating_sub(badge_w + margin);
    let y = height.saturating_sub(badge_h + margin);
    draw_filled_rect_mut(
        image,
        Rect::at(x as i32, y as i32).of_size(badge_w, badge_h),
        colour,
    );
    if let Some(font) = font {
        draw_text_mut(
            image,
            LABEL_COLOUR,
            (x + margin) as i32,
            (y + margin) as i32,
            PxScale::from(text_px),
            font,
            &label,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: AnomalyKind, t: f64, severity: Severity) -> AnomalyEvent {
        AnomalyEvent::new(kind, t, (t * 30.0) as u64, severity, "")
    }

    #[test]
    fn test_schedule_holds_overlay() {
        let schedule = OverlaySchedule::new(
            vec![
                event(AnomalyKind::FrameDrop, 1.0, Severity::Medium),
                event(AnomalyKind::BlurSpike, 1.2, Severity::High),
            ],
            0.5,
        );
        assert!(schedule.active_at(0.99).is_none());
        assert_eq!(schedule.active_at(1.0).unwrap().kind, AnomalyKind::FrameDrop);
        assert_eq!(schedule.active_at(1.3).unwrap().kind, AnomalyKind::BlurSpike);
        assert_eq!(schedule.active_at(1.65).unwrap().kind, AnomalyKind::BlurSpike);
        assert!(schedule.active_at(1.8).is_none());
    }

    #[test]
    fn test_anomalous_frame_gets_coloured_banner() {
        let mut image = RgbImage::from_pixel(320, 180, Rgb([0, 0, 0]));
        draw_overlay(
            &mut image,
            Some(&event(AnomalyKind::MotionStutter, 0.0, Severity::High)),
        );
        assert_eq!(*image.get_pixel(160, 1), MOTION_STUTTER_COLOUR);
        assert_eq!(*image.get_pixel(0, 90), MOTION_STUTTER_COLOUR);
        assert_eq!(*image.get_pixel(160, 90), Rgb([0, 0, 0]));
    }

    fn count(image: &RgbImage, region: Rect, matches: impl Fn(&Rgb<u8>) -> bool) -> usize {
        let mut n = 0;
        for y in region.top()..=region.bottom() {
            for x in region.left()..=region.right() {
                if matches(image.get_pixel(x as u32, y as u32)) {
                    n += 1;
                }
            }
        }
        n
    }

    fn is_label(pixel: &Rgb<u8>) -> bool {
        pixel.0.iter().all(|&c| c > 200)
    }

    #[test]
    fn test_captions_name_kind_frame_and_severity() {
        let drop = AnomalyEvent::new(AnomalyKind::FrameDrop, 4.5, 135, Severity::High, "");
        assert_eq!(banner_text(&drop), "[FrameDrop] Frame 135 | T=4.50s");
        assert_eq!(badge_text(&drop), "Severity: High");
    }

    #[test]
    fn test_labels_are_rendered_as_text() {
        assert!(label_font().is_some());

        let mut image = RgbImage::from_pixel(640, 360, Rgb([0, 0, 0]));
        draw_overlay(
            &mut image,
            Some(&event(AnomalyKind::FrameDrop, 2.0, Severity::Medium)),
        );
        // Banner is 36 px tall at this size; glyphs are drawn in white on it.
        let banner = Rect::at(0, 0).of_size(640, 36);
        assert!(count(&image, banner, is_label) > 50);
        let badge = Rect::at(320, 270).of_size(320, 90);
        assert!(count(&image, badge, is_label) > 20);
    }

    #[test]
    fn test_high_severity_badge_is_larger() {
        let quadrant = Rect::at(320, 180).of_size(320, 180);
        let area = |severity| {
            let mut image = RgbImage::from_pixel(640, 360, Rgb([0, 0, 0]));
            draw_overlay(
                &mut image,
                Some(&event(AnomalyKind::BlurSpike, 1.0, severity)),
            );
            count(&image, quadrant, |p| *p == BLUR_SPIKE_COLOUR || is_label(p))
        };
        assert!(area(Severity::High) > area(Severity::Medium));
    }

    #[test]
    fn test_normal_frame_gets_status_dot() {
        let mut image = RgbImage::from_pixel(320, 180, Rgb([0, 0, 0]));
        draw_overlay(&mut image, None);
        let unit = 3;
        assert_eq!(*image.get_pixel(320 - unit * 4, unit * 4), NORMAL_COLOUR);
        assert_eq!(*image.get_pixel(160, 1), Rgb([0, 0, 0]));
    }
}
