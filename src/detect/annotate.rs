use std::sync::OnceLock;

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use super::labels::label_for;
use super::result::{ClassId, Detection, Detections};

const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 14.0;
const LABEL_PADDING: u32 = 2;
const LABEL_TEXT_COLOUR: Rgb<u8> = Rgb([255, 255, 255]);

static FONT_BYTES: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

fn label_font() -> Option<&'static FontRef<'static>> {
    static FONT: OnceLock<Option<FontRef<'static>>> = OnceLock::new();
    FONT.get_or_init(|| match FontRef::try_from_slice(FONT_BYTES) {
        Ok(font) => Some(font),
        Err(err) => {
            log::warn!("annotate: label font unusable, drawing boxes only: {}", err);
            None
        }
    })
    .as_ref()
}

/// Per-class box colour, stable across frames.
pub fn class_colour(class_id: ClassId) -> Rgb<u8> {
    const PALETTE: [[u8; 3]; 8] = [
        [255, 56, 56],
        [255, 157, 151],
        [255, 112, 31],
        [255, 178, 29],
        [207, 210, 49],
        [72, 249, 10],
        [26, 147, 52],
        [0, 194, 255],
    ];
    Rgb(PALETTE[class_id as usize % PALETTE.len()])
}

/// Draw detection boxes onto the image the detector ran on, each with a
/// `label confidence` tag above it (below it when the box touches the top).
pub fn annotate(image: &mut RgbImage, detections: &Detections) {
    for det in &detections.items {
        let w = det.w.round() as u32;
        let h = det.h.round() as u32;
        if w == 0 || h == 0 {
            continue;
        }
        let colour = class_colour(det.class_id);
        let x = det.x.round() as i32;
        let y = det.y.round() as i32;
        for offset in 0..BOX_THICKNESS {
            let shrink = (offset * 2) as u32;
            if w <= shrink || h <= shrink {
                break;
            }
            let rect = Rect::at(x + offset, y + offset).of_size(w - shrink, h - shrink);
            draw_hollow_rect_mut(image, rect, colour);
        }
        draw_label(image, det, x, y, h, colour);
    }
}

fn draw_label(image: &mut RgbImage, det: &Detection, x: i32, y: i32, h: u32, colour: Rgb<u8>) {
    let Some(font) = label_font() else {
        return;
    };
    let text = format!("{} {:.2}", label_for(det.class_id), det.confidence);
    let scale = PxScale::from(LABEL_SCALE);
    let (text_w, text_h) = text_size(scale, font, &text);
    let bar_w = text_w + LABEL_PADDING * 2;
    let bar_h = text_h + LABEL_PADDING * 2;
    let bar_y = if y >= bar_h as i32 {
        y - bar_h as i32
    } else {
        y + h as i32
    };
    draw_filled_rect_mut(image, Rect::at(x, bar_y).of_size(bar_w, bar_h), colour);
    draw_text_mut(
        image,
        LABEL_TEXT_COLOUR,
        x + LABEL_PADDING as i32,
        bar_y + LABEL_PADDING as i32,
        scale,
        font,
        &text,
    );
}
