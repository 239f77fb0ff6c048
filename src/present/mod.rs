//! Showing pipeline results to the user.

use crate::{pipeline::PipelineError, translate::TranslationError, upload::UploadedImage};

pub mod json;
pub mod terminal;

/// Receives the result of each pipeline stage as soon as it is available.
///
/// Presenters never fail. Output errors are logged and otherwise ignored, so
/// a closed pipe cannot abort OCR halfway through.
pub trait Presenter: Send {
    /// The upload was decoded.
    fn image(&mut self, upload: &UploadedImage);

    /// OCR finished. `raw_text` may be empty.
    fn ocr_text(&mut self, raw_text: &str);

    /// Translation finished, successfully or not.
    fn translation(&mut self, outcome: &Result<String, TranslationError>);

    /// The upload failed before it could be completed.
    fn failure(&mut self, err: &PipelineError);

    /// Processing of the current upload is over.
    fn finish(&mut self);
}
