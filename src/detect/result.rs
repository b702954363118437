use std::collections::BTreeSet;

use super::labels::label_for;

/// Detector class identifier (COCO index for the bundled backends).
pub type ClassId = u32;

/// Set of class identifiers produced by one inference call.
pub type DetectionSet = BTreeSet<ClassId>;

/// One detected object, in pixel coordinates of the image passed to the detector.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_id: ClassId,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Detection {
    pub fn label(&self) -> &'static str {
        label_for(self.class_id)
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.w).min(other.x + other.w);
        let bottom = (self.y + self.h).min(other.y + other.h);
        let inter = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Result of running detection on one image.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Detections {
    pub items: Vec<Detection>,
}

impl Detections {
    pub fn new(items: Vec<Detection>) -> Self {
        Self { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Distinct classes present.
    pub fn class_set(&self) -> DetectionSet {
        self.items.iter().map(|d| d.class_id).collect()
    }

    /// Distinct labels present, in class-id order.
    pub fn labels(&self) -> Vec<&'static str> {
        self.class_set().into_iter().map(label_for).collect()
    }

    /// Class-wise non-maximum suppression. Keeps the highest-confidence box of
    /// every group whose IoU exceeds `iou_threshold`.
    pub fn suppress_overlaps(self, iou_threshold: f32) -> Self {
        let mut candidates = self.items;
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let overlaps = kept.iter().any(|k| {
                k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold
            });
            if !overlaps {
                kept.push(candidate);
            }
        }
        Self { items: kept }
    }
}
