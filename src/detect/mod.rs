mod annotate;
mod backend;
mod backends;
pub mod labels;
mod registry;
mod result;

pub use annotate::{annotate, class_colour};
pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use labels::{class_for_label, label_for, COCO_LABELS};
pub use registry::{available_backends, build_backend};
pub use result::{ClassId, Detection, DetectionSet, Detections};
