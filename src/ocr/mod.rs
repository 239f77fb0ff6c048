//! OCR engine interface.

use crate::prelude::*;

pub mod tesseract;

/// Interface to an OCR engine.
///
/// Engines are loaded once and shared, so `recognize` must be safe to call
/// from several uploads at once.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// Recognize the text in an image file.
    ///
    /// Returns one fragment per detected text region, in the engine's own
    /// region order. An image without text gives an empty list.
    async fn recognize(&self, image_path: &Path) -> Result<Vec<String>>;
}
