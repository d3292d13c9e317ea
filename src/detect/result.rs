use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates.
///
/// Serialized as `[x1, y1, x2, y2]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from centre-format `(cx, cy, w, h)`.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Signed area; degenerate or inverted boxes can go to zero or below.
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// `width / height`, or `0.0` when the height is not positive.
    pub fn aspect_ratio(&self) -> f32 {
        let height = self.height();
        if height > 0.0 {
            self.width() / height
        } else {
            0.0
        }
    }

    /// Clamp every coordinate into `[0, limit]`.
    pub fn clamped(&self, limit: f32) -> Self {
        Self::new(
            self.x1.clamp(0.0, limit),
            self.y1.clamp(0.0, limit),
            self.x2.clamp(0.0, limit),
            self.y2.clamp(0.0, limit),
        )
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area().max(0.0) + other.area().max(0.0) - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// Classes the detector was trained on.
///
/// Order matters: the discriminant is the model's class index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeaponClass {
    Drill = 0,
    Knife = 1,
}

impl WeaponClass {
    pub const ALL: [WeaponClass; 2] = [WeaponClass::Drill, WeaponClass::Knife];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WeaponClass::Drill => "drill",
            WeaponClass::Knife => "knife",
        }
    }
}

impl std::fmt::Display for WeaponClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend output before remapping and filtering.
///
/// `bbox` is in letterboxed canvas pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: usize,
}

/// Accepted detection in original-image pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class: WeaponClass,
}

/// Result of one detection call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detected: bool,
    pub detections: Vec<Detection>,
    pub count: usize,
}

impl DetectionResult {
    pub fn from_detections(detections: Vec<Detection>) -> Self {
        Self {
            detected: !detections.is_empty(),
            count: detections.len(),
            detections,
        }
    }
}
