use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Stub backend for testing. Replays scripted canvas detections.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    detections: Vec<RawDetection>,
    failure: Option<String>,
    calls: usize,
    last_canvas: Option<(u32, u32)>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `detections` from every call.
    pub fn with_detections(detections: Vec<RawDetection>) -> Self {
        Self {
            detections,
            ..Self::default()
        }
    }

    /// Fail every call with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Dimensions of the most recent canvas passed to `infer`.
    pub fn last_canvas(&self) -> Option<(u32, u32)> {
        self.last_canvas
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, canvas: &RgbImage) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        self.last_canvas = Some(canvas.dimensions());
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        Ok(self.detections.clone())
    }
}
