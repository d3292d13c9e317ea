use anyhow::Result;
use image::RgbImage;

use crate::detect::result::RawDetection;

/// Detector backend trait.
///
/// A backend wraps the pretrained model. It receives the letterboxed canvas
/// and returns raw boxes in canvas pixel coordinates, after whatever
/// suppression the model itself performs. Remapping and class filtering
/// happen outside the backend.
///
/// Model weights are loaded once at construction and treated as read-only.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the model on one square canvas.
    fn infer(&mut self, canvas: &RgbImage) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
