#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, RawDetection, WeaponClass};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Model-side settings: what the pretrained library applies before handing
/// boxes back.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TractSettings {
    /// Square input edge in pixels.
    pub input_size: u32,
    /// Score floor applied while decoding the head.
    pub confidence: f32,
    /// IoU above which a lower-scored box of the same class is suppressed.
    pub iou: f32,
    pub max_detections: usize,
    pub num_classes: usize,
}

impl Default for TractSettings {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence: 0.4,
            iou: 0.7,
            max_detections: 300,
            num_classes: WeaponClass::ALL.len(),
        }
    }
}

/// Tract-based backend for ONNX inference.
///
/// Expects a single-output detector export with a `[1, 4 + classes, anchors]`
/// head (or its transpose) carrying centre-format boxes in input pixels
/// followed by per-class scores.
pub struct TractBackend {
    model: Plan,
    settings: TractSettings,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, settings: TractSettings) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = settings.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "loaded detector model {} ({}x{} input, {} classes)",
            model_path.display(),
            size,
            size,
            settings.num_classes
        );

        Ok(Self { model, settings })
    }

    fn build_input(&self, canvas: &RgbImage) -> Result<Tensor> {
        let (width, height) = canvas.dimensions();
        if width != self.settings.input_size || height != self.settings.input_size {
            return Err(anyhow!(
                "canvas size {}x{} does not match model input {}x{}",
                width,
                height,
                self.settings.input_size,
                self.settings.input_size
            ));
        }

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width as usize),
            |(_, channel, y, x)| canvas.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );

        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not rank 3")?;
        decode_head(view, &self.settings)
    }
}

/// Decode a `[1, 4 + classes, anchors]` head, or its transpose, into
/// thresholded, suppressed canvas detections.
pub(crate) fn decode_head(
    view: tract_ndarray::ArrayView3<'_, f32>,
    settings: &TractSettings,
) -> Result<Vec<RawDetection>> {
    let features = 4 + settings.num_classes;
    let (_, d1, d2) = view.dim();
    let (anchors, transposed) = if d1 == features {
        (d2, false)
    } else if d2 == features {
        (d1, true)
    } else {
        return Err(anyhow!(
            "model output shape {:?} has no axis of {} features",
            view.shape(),
            features
        ));
    };
    let at = |anchor: usize, feature: usize| {
        if transposed {
            view[[0, anchor, feature]]
        } else {
            view[[0, feature, anchor]]
        }
    };

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (0..settings.num_classes)
            .map(|c| (c, at(anchor, 4 + c)))
            .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if !score.is_finite() || score <= settings.confidence {
            continue;
        }
        let (cx, cy, w, h) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
        if w <= 0.0 || h <= 0.0 {
            continue;
        }
        candidates.push(RawDetection {
            bbox: BoundingBox::from_center(cx, cy, w, h),
            confidence: score,
            class_id,
        });
    }

    let before = candidates.len();
    let mut kept = non_max_suppression(candidates, settings.iou);
    kept.truncate(settings.max_detections);
    log::debug!("decoded {} candidates, {} after nms", before, kept.len());
    Ok(kept)
}

/// Class-aware greedy NMS. Output is sorted by descending confidence.
pub(crate) fn non_max_suppression(mut candidates: Vec<RawDetection>, iou: f32) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, canvas: &RgbImage) -> Result<Vec<RawDetection>> {
        let input = self.build_input(canvas)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        let size = self.settings.input_size;
        let canvas = RgbImage::from_pixel(size, size, image::Rgb([114, 114, 114]));
        self.infer(&canvas).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(x1: f32, conf: f32, class_id: usize) -> RawDetection {
        RawDetection {
            bbox: BoundingBox::new(x1, 0.0, x1 + 100.0, 100.0),
            confidence: conf,
            class_id,
        }
    }

    #[test]
    fn nms_suppresses_same_class_overlap_only() {
        let kept = non_max_suppression(
            vec![raw(0.0, 0.6, 1), raw(5.0, 0.9, 1), raw(5.0, 0.8, 0), raw(500.0, 0.5, 1)],
            0.7,
        );
        let confs: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.9, 0.8, 0.5]);
    }

    /// Anchor-major head, `[1, anchors, cx cy w h drill knife]`.
    fn head(rows: &[[f32; 6]]) -> tract_ndarray::Array3<f32> {
        tract_ndarray::Array3::from_shape_fn((1, rows.len(), 6), |(_, a, f)| rows[a][f])
    }

    const ROWS: [[f32; 6]; 3] = [
        [100.0, 100.0, 20.0, 40.0, 0.2, 0.9],
        [300.0, 300.0, 50.0, 50.0, 0.4, 0.1],
        [500.0, 500.0, 0.0, 30.0, 0.8, 0.0],
    ];

    #[test]
    fn decode_reads_both_head_orientations() {
        let settings = TractSettings::default();
        let anchors_last = head(&ROWS);
        let features_first = anchors_last.view().permuted_axes([0, 2, 1]);
        assert_eq!(features_first.dim(), (1, 6, 3));

        for view in [anchors_last.view(), features_first] {
            let decoded = decode_head(view, &settings).unwrap();
            // score exactly at the floor and the zero-width box are dropped
            assert_eq!(decoded.len(), 1);
            assert_eq!(decoded[0].class_id, WeaponClass::Knife.index());
            assert_eq!(decoded[0].confidence, 0.9);
            assert_eq!(decoded[0].bbox, BoundingBox::new(90.0, 80.0, 110.0, 120.0));
        }
    }

    #[test]
    fn decode_rejects_unexpected_shape() {
        let wrong = tract_ndarray::Array3::<f32>::zeros((1, 5, 3));
        let err = decode_head(wrong.view(), &TractSettings::default()).unwrap_err();
        assert!(err.to_string().contains("features"));
    }

    #[test]
    fn decode_caps_detection_count() {
        let rows: Vec<[f32; 6]> = (0..5)
            .map(|i| [50.0 + 60.0 * i as f32, 50.0, 20.0, 20.0, 0.0, 0.5 + 0.1 * i as f32])
            .collect();
        let settings = TractSettings {
            max_detections: 2,
            ..TractSettings::default()
        };
        let decoded = decode_head(head(&rows).view(), &settings).unwrap();
        let confs: Vec<f32> = decoded.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.5 + 0.1 * 4.0, 0.5 + 0.1 * 3.0]);
    }
}
