//! End-to-end detection pipeline: decode, letterbox, enhance, infer, filter.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use image::DynamicImage;

#[cfg(feature = "backend-tract")]
use crate::config::ModelSettings;
use crate::config::PipelineSettings;
use crate::detect::{Detection, DetectionResult, DetectorBackend, RawDetection};
use crate::postprocess::{filter_detections, remap, FilterPolicy};
use crate::preprocess::{Enhancement, Letterbox, LetterboxTransform};

/// Weapon detector bound to one backend.
pub struct WeaponDetector {
    backend: Box<dyn DetectorBackend>,
    letterbox: Letterbox,
    enhancement: Option<Enhancement>,
    policy: FilterPolicy,
}

impl WeaponDetector {
    /// Detector with the default 640px canvas, enhancement and thresholds.
    pub fn new<B: DetectorBackend + 'static>(backend: B) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: Box<dyn DetectorBackend>) -> Self {
        Self {
            backend,
            letterbox: Letterbox::default(),
            enhancement: Some(Enhancement::default()),
            policy: FilterPolicy::default(),
        }
    }

    pub fn from_settings<B: DetectorBackend + 'static>(
        backend: B,
        settings: &PipelineSettings,
    ) -> Self {
        Self::new(backend)
            .with_letterbox(settings.letterbox)
            .with_enhancement(settings.enhancement)
            .with_policy(settings.filter)
    }

    /// Load the ONNX model named in `model` and wrap it in the pipeline.
    #[cfg(feature = "backend-tract")]
    pub fn load_onnx(model: &ModelSettings, settings: &PipelineSettings) -> Result<Self> {
        use crate::detect::{TractBackend, TractSettings};

        let backend = TractBackend::new(
            &model.path,
            TractSettings {
                input_size: settings.letterbox.target_size,
                confidence: model.confidence,
                iou: model.iou,
                max_detections: model.max_detections,
                ..TractSettings::default()
            },
        )?;
        Ok(Self::from_settings(backend, settings))
    }

    pub fn with_letterbox(mut self, letterbox: Letterbox) -> Self {
        self.letterbox = letterbox;
        self
    }

    /// `None` feeds the plain letterboxed canvas to the model.
    pub fn with_enhancement(mut self, enhancement: Option<Enhancement>) -> Self {
        self.enhancement = enhancement;
        self
    }

    pub fn with_policy(mut self, policy: FilterPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn policy(&self) -> &FilterPolicy {
        &self.policy
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.backend.warm_up()
    }

    /// Run the full pipeline on a decoded image.
    pub fn detect(&mut self, image: &DynamicImage) -> Result<DetectionResult> {
        let start = Instant::now();
        let (raw, transform) = self.infer(image)?;
        let detections = filter_detections(&raw, &transform, &self.policy);
        log::debug!(
            "{} backend: {} raw, {} accepted in {:?}",
            self.backend.name(),
            raw.len(),
            detections.len(),
            start.elapsed()
        );
        Ok(DetectionResult::from_detections(detections))
    }

    /// Remapped model output without the acceptance policy.
    pub fn detect_raw(&mut self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let (raw, transform) = self.infer(image)?;
        Ok(remap(&raw, &transform))
    }

    /// Decode an encoded image (jpeg, png, bmp) and detect.
    pub fn detect_bytes(&mut self, bytes: &[u8]) -> Result<DetectionResult> {
        let image = image::load_from_memory(bytes).context("failed to decode image")?;
        self.detect(&image)
    }

    pub fn detect_path<P: AsRef<Path>>(&mut self, path: P) -> Result<DetectionResult> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("failed to read image {}", path.display()))?;
        self.detect(&image)
    }

    fn infer(
        &mut self,
        image: &DynamicImage,
    ) -> Result<(Vec<RawDetection>, LetterboxTransform)> {
        let (mut canvas, transform) = self.letterbox.apply(image)?;
        if let Some(enhancement) = &self.enhancement {
            enhancement.apply(&mut canvas);
        }
        let raw = self
            .backend
            .infer(&canvas)
            .with_context(|| format!("{} inference failed", self.backend.name()))?;
        Ok((raw, transform))
    }
}
