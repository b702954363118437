use anyhow::Result;
use image::RgbImage;

use super::result::Detections;

/// Detector backend trait.
///
/// Backends receive the ROI sub-image only and return detections in that
/// image's pixel coordinates. They must not keep the image beyond the call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on an RGB image.
    fn detect(&mut self, image: &RgbImage) -> Result<Detections>;

    /// Optional warm-up hook, run once before the loop starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
