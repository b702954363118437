//! Frames and the region of interest.
//!
//! - `Frame`: one captured RGB image, owned by the iteration that read it.
//! - `Region`: the static ROI rectangle. Extracting copies the ROI pixels out;
//!   compositing writes a processed ROI back at the same place.
//!
//! A region that does not fit inside the frame is a configuration error. It is
//! rejected by `Region::validate_within` at startup and again by `extract` /
//! `composite`; it is never clamped.

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use image::imageops;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// ROI outline colour (green).
pub const OUTLINE_COLOUR: Rgb<u8> = Rgb([0, 255, 0]);
/// ROI outline thickness in pixels.
pub const OUTLINE_THICKNESS: u32 = 2;

/// One captured frame.
pub struct Frame {
    pub image: RgbImage,
    /// Source-assigned sequence number, starting at 1.
    pub sequence: u64,
    /// Monotonic capture time.
    pub captured_at: Timestamp,
    /// Local wall-clock capture time.
    pub wall_time: NaiveDateTime,
}

impl Frame {
    pub fn new(
        image: RgbImage,
        sequence: u64,
        captured_at: Timestamp,
        wall_time: NaiveDateTime,
    ) -> Self {
        Self {
            image,
            sequence,
            captured_at,
            wall_time,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Axis-aligned rectangle in frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Check the region is non-empty and lies entirely inside a `width` x `height` frame.
    pub fn validate_within(&self, width: u32, height: u32) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("region {} has zero area", self));
        }
        let right = self
            .x
            .checked_add(self.width)
            .ok_or_else(|| anyhow!("region {} overflows", self))?;
        let bottom = self
            .y
            .checked_add(self.height)
            .ok_or_else(|| anyhow!("region {} overflows", self))?;
        if right > width || bottom > height {
            return Err(anyhow!(
                "region {} does not fit inside {}x{} frame",
                self,
                width,
                height
            ));
        }
        Ok(())
    }

    /// Copy the pixels inside the region.
    pub fn extract(&self, image: &RgbImage) -> Result<RgbImage> {
        self.validate_within(image.width(), image.height())?;
        Ok(imageops::crop_imm(image, self.x, self.y, self.width, self.height).to_image())
    }

    /// Write `sub_image` back into `image` at the region's origin.
    pub fn composite(&self, image: &mut RgbImage, sub_image: &RgbImage) -> Result<()> {
        self.validate_within(image.width(), image.height())?;
        if sub_image.dimensions() != (self.width, self.height) {
            return Err(anyhow!(
                "sub-image is {}x{}, region {} expects {}x{}",
                sub_image.width(),
                sub_image.height(),
                self,
                self.width,
                self.height
            ));
        }
        imageops::replace(image, sub_image, self.x as i64, self.y as i64);
        Ok(())
    }

    /// Draw the region outline on the full frame.
    pub fn draw_outline(&self, image: &mut RgbImage, colour: Rgb<u8>, thickness: u32) {
        for offset in 0..thickness {
            let shrink = offset * 2;
            if self.width <= shrink || self.height <= shrink {
                break;
            }
            let rect = Rect::at((self.x + offset) as i32, (self.y + offset) as i32)
                .of_size(self.width - shrink, self.height - shrink);
            draw_hollow_rect_mut(image, rect, colour);
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {}x{})", self.x, self.y, self.width, self.height)
    }
}

/// Extract the region from a frame. Returns the sub-image and the region used.
pub fn extract(frame: &Frame, region: Region) -> Result<(RgbImage, Region)> {
    Ok((region.extract(&frame.image)?, region))
}

/// Write a processed sub-image back into the frame at `region`.
pub fn composite(frame: &mut Frame, sub_image: &RgbImage, region: Region) -> Result<()> {
    region.composite(&mut frame.image, sub_image)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    fn frame(width: u32, height: u32) -> Frame {
        Frame::new(
            gradient(width, height),
            1,
            Timestamp::ZERO,
            NaiveDateTime::default(),
        )
    }

    #[test]
    fn validate_accepts_region_touching_edges() {
        assert!(Region::new(0, 0, 640, 480).validate_within(640, 480).is_ok());
        assert!(Region::new(100, 100, 400, 380).validate_within(640, 480).is_ok());
    }

    #[test]
    fn validate_rejects_out_of_bounds_and_empty() {
        assert!(Region::new(100, 100, 400, 400).validate_within(640, 480).is_err());
        assert!(Region::new(641, 0, 1, 1).validate_within(640, 480).is_err());
        assert!(Region::new(0, 0, 0, 10).validate_within(640, 480).is_err());
        assert!(Region::new(u32::MAX, 0, 2, 2).validate_within(640, 480).is_err());
    }

    #[test]
    fn extract_copies_region_pixels() {
        let f = frame(64, 48);
        let region = Region::new(10, 5, 20, 30);
        let (sub, used) = extract(&f, region).unwrap();

        assert_eq!(used, region);
        assert_eq!(sub.dimensions(), (20, 30));
        assert_eq!(sub.get_pixel(0, 0), f.image.get_pixel(10, 5));
        assert_eq!(sub.get_pixel(19, 29), f.image.get_pixel(29, 34));
    }

    #[test]
    fn extract_then_composite_is_identity() {
        let mut f = frame(64, 48);
        let original = f.image.clone();
        let region = Region::new(7, 3, 33, 21);

        let (sub, region) = extract(&f, region).unwrap();
        composite(&mut f, &sub, region).unwrap();

        assert_eq!(f.image, original);
    }

    #[test]
    fn composite_only_touches_region() {
        let mut f = frame(32, 32);
        let original = f.image.clone();
        let region = Region::new(8, 8, 8, 8);
        let painted = RgbImage::from_pixel(8, 8, Rgb([255, 0, 255]));

        composite(&mut f, &painted, region).unwrap();

        for (x, y, pixel) in f.image.enumerate_pixels() {
            let inside = (8..16).contains(&x) && (8..16).contains(&y);
            if inside {
                assert_eq!(*pixel, Rgb([255, 0, 255]));
            } else {
                assert_eq!(pixel, original.get_pixel(x, y));
            }
        }
    }

    #[test]
    fn composite_rejects_mismatched_size() {
        let mut f = frame(32, 32);
        let wrong = RgbImage::new(4, 4);
        assert!(composite(&mut f, &wrong, Region::new(0, 0, 8, 8)).is_err());
    }

    #[test]
    fn outline_is_drawn_on_region_border() {
        let mut image = RgbImage::new(40, 40);
        let region = Region::new(10, 10, 20, 20);
        region.draw_outline(&mut image, OUTLINE_COLOUR, OUTLINE_THICKNESS);

        assert_eq!(*image.get_pixel(10, 10), OUTLINE_COLOUR);
        assert_eq!(*image.get_pixel(11, 11), OUTLINE_COLOUR);
        assert_eq!(*image.get_pixel(29, 20), OUTLINE_COLOUR);
        assert_eq!(*image.get_pixel(20, 20), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(9, 9), Rgb([0, 0, 0]));
    }
}
