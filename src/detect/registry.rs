use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;

use super::backend::DetectorBackend;
use super::backends::StubBackend;

/// Names of the backends compiled into this build.
pub fn available_backends() -> Vec<&'static str> {
    let mut names = vec!["stub"];
    if cfg!(feature = "backend-tract") {
        names.push("tract");
    }
    names
}

/// Build the backend named in the detector settings and warm it up.
pub fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let mut backend: Box<dyn DetectorBackend> = match settings.backend.as_str() {
        "stub" => Box::new(StubBackend::new(settings.stub_class)),
        "tract" => build_tract(settings)?,
        other => {
            return Err(anyhow!(
                "unknown detector backend '{}' (available: {})",
                other,
                available_backends().join(", ")
            ))
        }
    };
    backend.warm_up()?;
    log::info!("detector backend '{}' ready", backend.name());
    Ok(backend)
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let backend = super::backends::TractBackend::new(&settings.model_path, settings.input_size)?
        .with_threshold(settings.confidence_threshold);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "detector backend 'tract' requires the backend-tract feature"
    ))
}
