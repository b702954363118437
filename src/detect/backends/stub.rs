use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{ClassId, Detection, Detections};

const DEFAULT_LUMA_THRESHOLD: u8 = 200;
const DEFAULT_MIN_PIXELS: u32 = 16;

/// Stub backend for testing and demos.
///
/// Treats every bright pixel as part of a single object of `class_id` and
/// reports one detection covering their bounding box. Pairs with the
/// synthetic source, which draws a bright square moving across the scene.
pub struct StubBackend {
    class_id: ClassId,
    luma_threshold: u8,
    min_pixels: u32,
}

impl StubBackend {
    pub fn new(class_id: ClassId) -> Self {
        Self {
            class_id,
            luma_threshold: DEFAULT_LUMA_THRESHOLD,
            min_pixels: DEFAULT_MIN_PIXELS,
        }
    }

    pub fn with_threshold(mut self, luma_threshold: u8, min_pixels: u32) -> Self {
        self.luma_threshold = luma_threshold;
        self.min_pixels = min_pixels.max(1);
        self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Detections> {
        let mut count = 0u32;
        let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
        let (mut max_x, mut max_y) = (0u32, 0u32);

        for (x, y, pixel) in image.enumerate_pixels() {
            if pixel.0.iter().all(|&c| c >= self.luma_threshold) {
                count += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }

        if count < self.min_pixels {
            return Ok(Detections::default());
        }

        let w = max_x - min_x + 1;
        let h = max_y - min_y + 1;
        let fill = count as f32 / (w * h) as f32;

        Ok(Detections::new(vec![Detection {
            class_id: self.class_id,
            confidence: 0.5 + 0.5 * fill.min(1.0),
            x: min_x as f32,
            y: min_y as f32,
            w: w as f32,
            h: h as f32,
        }]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn dark_image_has_no_detections() {
        let mut backend = StubBackend::default();
        let image = RgbImage::from_pixel(32, 32, Rgb([20, 20, 20]));
        assert!(backend.detect(&image).unwrap().is_empty());
    }

    #[test]
    fn bright_square_is_one_detection() {
        let mut backend = StubBackend::new(2);
        let mut image = RgbImage::from_pixel(32, 32, Rgb([20, 20, 20]));
        for y in 10..18 {
            for x in 4..12 {
                image.put_pixel(x, y, Rgb([250, 250, 250]));
            }
        }

        let detections = backend.detect(&image).unwrap();
        assert_eq!(detections.len(), 1);
        let det = &detections.items[0];
        assert_eq!(det.class_id, 2);
        assert_eq!((det.x, det.y, det.w, det.h), (4.0, 10.0, 8.0, 8.0));
        assert!((det.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn specks_below_min_pixels_are_ignored() {
        let mut backend = StubBackend::default().with_threshold(200, 4);
        let mut image = RgbImage::new(16, 16);
        image.put_pixel(1, 1, Rgb([255, 255, 255]));
        image.put_pixel(9, 9, Rgb([255, 255, 255]));
        assert!(backend.detect(&image).unwrap().is_empty());
    }
}
