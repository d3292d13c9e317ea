//! Post-filtering of raw detector output.
//!
//! Raw boxes arrive in canvas coordinates. They are mapped back to the
//! source image, clamped to the canvas extent and then gated by a global
//! confidence floor followed by a per-class rule on confidence, box area and
//! aspect ratio. Overlapping boxes are not merged.

use serde::{Deserialize, Serialize};

use crate::detect::{BoundingBox, Detection, RawDetection, WeaponClass};
use crate::preprocess::LetterboxTransform;

/// Acceptance rule for one class.
///
/// A detection is rejected when its confidence is below `min_confidence`,
/// its area is below `min_area`, or its aspect ratio (`width / height`)
/// falls outside `[min_aspect, max_aspect]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassRule {
    pub min_confidence: f32,
    pub min_area: f32,
    pub min_aspect: f32,
    pub max_aspect: f32,
}

impl ClassRule {
    pub const KNIFE: ClassRule = ClassRule {
        min_confidence: 0.5,
        min_area: 1000.0,
        min_aspect: 0.2,
        max_aspect: 5.0,
    };

    pub const DRILL: ClassRule = ClassRule {
        min_confidence: 0.45,
        min_area: 2000.0,
        min_aspect: 0.5,
        max_aspect: 2.0,
    };

    pub fn admits(&self, confidence: f32, bbox: &BoundingBox) -> bool {
        if confidence < self.min_confidence {
            return false;
        }
        if bbox.area() < self.min_area {
            return false;
        }
        let aspect = bbox.aspect_ratio();
        aspect >= self.min_aspect && aspect <= self.max_aspect
    }
}

/// Thresholds applied to every detection.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterPolicy {
    /// Exclusive global floor: only `confidence > min_confidence` survives.
    pub min_confidence: f32,
    pub drill: ClassRule,
    pub knife: ClassRule,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            min_confidence: 0.4,
            drill: ClassRule::DRILL,
            knife: ClassRule::KNIFE,
        }
    }
}

impl FilterPolicy {
    pub fn rule(&self, class: WeaponClass) -> &ClassRule {
        match class {
            WeaponClass::Drill => &self.drill,
            WeaponClass::Knife => &self.knife,
        }
    }

    pub fn rule_mut(&mut self, class: WeaponClass) -> &mut ClassRule {
        match class {
            WeaponClass::Drill => &mut self.drill,
            WeaponClass::Knife => &mut self.knife,
        }
    }

    /// Decide on one remapped detection.
    pub fn admits(&self, class: WeaponClass, confidence: f32, bbox: &BoundingBox) -> bool {
        confidence > self.min_confidence && self.rule(class).admits(confidence, bbox)
    }
}

/// Map raw canvas boxes back to the source image, clamped to the canvas
/// extent. Unknown class ids are dropped.
pub fn remap(raw: &[RawDetection], transform: &LetterboxTransform) -> Vec<Detection> {
    let limit = transform.target_size as f32;
    raw.iter()
        .filter_map(|det| {
            let Some(class) = WeaponClass::from_index(det.class_id) else {
                log::warn!("dropping detection with unknown class id {}", det.class_id);
                return None;
            };
            Some(Detection {
                bbox: transform.to_original(det.bbox).clamped(limit),
                confidence: det.confidence,
                class,
            })
        })
        .collect()
}

/// Remap and filter in one pass, preserving input order.
pub fn filter_detections(
    raw: &[RawDetection],
    transform: &LetterboxTransform,
    policy: &FilterPolicy,
) -> Vec<Detection> {
    let accepted: Vec<Detection> = remap(raw, transform)
        .into_iter()
        .filter(|det| policy.admits(det.class, det.confidence, &det.bbox))
        .collect();
    log::debug!("accepted {} of {} raw detections", accepted.len(), raw.len());
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Canvas equal to the source image: no scaling, no padding.
    fn identity() -> LetterboxTransform {
        LetterboxTransform {
            scale: 1.0,
            pad_left: 0,
            pad_top: 0,
            target_size: 640,
            original_width: 640,
            original_height: 640,
        }
    }

    fn raw(class_id: usize, confidence: f32, bbox: [f32; 4]) -> RawDetection {
        RawDetection {
            bbox: bbox.into(),
            confidence,
            class_id,
        }
    }

    // 100x100: area 10000, aspect 1.0, admissible for both classes.
    const SQUARE: [f32; 4] = [100.0, 100.0, 200.0, 200.0];

    fn run(detections: &[RawDetection]) -> Vec<Detection> {
        filter_detections(detections, &identity(), &FilterPolicy::default())
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(run(&[]).is_empty());
    }

    #[test]
    fn global_floor_is_exclusive() {
        let mut policy = FilterPolicy::default();
        policy.knife.min_confidence = 0.0;
        let at = [raw(1, 0.4, SQUARE)];
        let above = [raw(1, 0.41, SQUARE)];
        assert!(filter_detections(&at, &identity(), &policy).is_empty());
        assert_eq!(filter_detections(&above, &identity(), &policy).len(), 1);
    }

    #[test]
    fn class_floor_rejects_strictly_below() {
        assert!(run(&[raw(1, 0.49, SQUARE)]).is_empty());
        assert_eq!(run(&[raw(1, 0.5, SQUARE)]).len(), 1);
        assert_eq!(run(&[raw(1, 0.51, SQUARE)]).len(), 1);

        assert!(run(&[raw(0, 0.44, SQUARE)]).is_empty());
        assert_eq!(run(&[raw(0, 0.45, SQUARE)]).len(), 1);
        assert_eq!(run(&[raw(0, 0.46, SQUARE)]).len(), 1);
    }

    #[test]
    fn aspect_ratio_outside_range_always_rejected() {
        // 300x100: aspect 3.0, fine for a knife, too wide for a drill.
        let wide = [0.0, 0.0, 300.0, 100.0];
        assert_eq!(run(&[raw(1, 0.99, wide)]).len(), 1);
        assert!(run(&[raw(0, 0.99, wide)]).is_empty());

        // 600x100: aspect 6.0, too wide for either.
        let sliver = [0.0, 0.0, 600.0, 100.0];
        assert!(run(&[raw(1, 1.0, sliver)]).is_empty());
        assert!(run(&[raw(0, 1.0, sliver)]).is_empty());

        // Tall: 20x200 gives 0.1.
        let tall = [0.0, 0.0, 20.0, 200.0];
        assert!(run(&[raw(1, 1.0, tall)]).is_empty());
    }

    #[test]
    fn small_boxes_rejected_by_class_area() {
        // 40x40 = 1600: enough for a knife, too small for a drill.
        let small = [0.0, 0.0, 40.0, 40.0];
        assert_eq!(run(&[raw(1, 0.9, small)]).len(), 1);
        assert!(run(&[raw(0, 0.9, small)]).is_empty());
    }

    #[test]
    fn degenerate_box_is_rejected() {
        assert!(run(&[raw(1, 0.9, [10.0, 10.0, 200.0, 10.0])]).is_empty());
    }

    #[test]
    fn unknown_class_ids_are_dropped() {
        assert!(run(&[raw(7, 0.99, SQUARE)]).is_empty());
    }

    #[test]
    fn overlapping_boxes_of_same_class_all_pass() {
        let kept = run(&[
            raw(1, 0.9, SQUARE),
            raw(1, 0.8, [105.0, 105.0, 205.0, 205.0]),
        ]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.8);
    }

    #[test]
    fn boxes_are_remapped_and_clamped() {
        let transform = LetterboxTransform {
            scale: 0.5,
            pad_left: 0,
            pad_top: 140,
            target_size: 640,
            original_width: 1280,
            original_height: 720,
        };
        let kept = filter_detections(
            &[raw(1, 0.9, [10.0, 150.0, 110.0, 250.0])],
            &transform,
            &FilterPolicy::default(),
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].bbox, BoundingBox::new(20.0, 20.0, 220.0, 220.0));

        let out_of_canvas = remap(&[raw(1, 0.9, [-20.0, 100.0, 700.0, 600.0])], &identity());
        assert_eq!(out_of_canvas[0].bbox, BoundingBox::new(0.0, 100.0, 640.0, 600.0));
    }
}
