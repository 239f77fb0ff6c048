//! The upload → OCR → assemble → translate → present pipeline.
//!
//! Each upload runs the stages strictly in order. Any failure ends the
//! current upload only.

use std::{error, fmt};

use crate::{
    assemble::assemble,
    models::ModelProvider,
    prelude::*,
    present::Presenter,
    translate::TranslationError,
    ui::{ProgressConfig, Ui},
    upload::{UploadError, UploadedImage},
};

/// A failure which ends processing of an upload.
#[derive(Debug)]
pub enum PipelineError {
    /// The upload was not a usable PNG or JPEG image.
    Upload(UploadError),

    /// The OCR engine or translation model could not be loaded.
    ModelLoad(anyhow::Error),

    /// Text recognition failed.
    Ocr(anyhow::Error),
}

impl PipelineError {
    /// A message for the user.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Upload(err) => {
                format!("Could not read the uploaded image: {err}.")
            }
            PipelineError::ModelLoad(_) => {
                "Could not load the OCR engine or translation model. See the log for details."
                    .to_owned()
            }
            PipelineError::Ocr(_) => {
                "Text recognition failed. The image may be corrupt or in an unsupported format."
                    .to_owned()
            }
        }
    }

    /// A short, stable name for this kind of failure.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Upload(_) => "upload",
            PipelineError::ModelLoad(_) => "model_load",
            PipelineError::Ocr(_) => "ocr",
        }
    }

    /// Does this failure make later uploads pointless?
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::ModelLoad(_))
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Upload(err) => write!(f, "could not read the upload: {err}"),
            PipelineError::ModelLoad(_) => write!(f, "could not load models"),
            PipelineError::Ocr(_) => write!(f, "text recognition failed"),
        }
    }
}

impl error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            PipelineError::Upload(err) => Some(err),
            PipelineError::ModelLoad(err) | PipelineError::Ocr(err) => {
                let err: &(dyn error::Error + 'static) = err.as_ref();
                Some(err)
            }
        }
    }
}

/// What a successful run produced.
#[derive(Debug)]
pub struct PipelineOutcome {
    /// The OCR fragments, joined.
    pub raw_text: String,

    /// `None` if there was no text to translate.
    pub translation: Option<Result<String, TranslationError>>,
}

/// Process one upload, showing each stage's result as soon as it is ready.
#[instrument(level = "info", name = "upload", skip_all, fields(path = %path.display()))]
pub async fn process_upload(
    ui: &Ui,
    models: &dyn ModelProvider,
    path: &Path,
    presenter: &mut dyn Presenter,
) -> Result<PipelineOutcome, PipelineError> {
    let result = run_stages(ui, models, path, presenter).await;
    if let Err(err) = &result {
        warn!(kind = err.kind(), "Upload failed: {:?}", PipelineErrorChain(err));
        presenter.failure(err);
    }
    presenter.finish();
    result
}

async fn run_stages(
    ui: &Ui,
    models: &dyn ModelProvider,
    path: &Path,
    presenter: &mut dyn Presenter,
) -> Result<PipelineOutcome, PipelineError> {
    let upload = UploadedImage::from_path(path)
        .await
        .map_err(PipelineError::Upload)?;
    presenter.image(&upload);

    let raw_text = recognize(ui, models, &upload).await?;
    presenter.ocr_text(&raw_text);

    if raw_text.is_empty() {
        debug!("No text recognized; skipping translation");
        return Ok(PipelineOutcome {
            raw_text,
            translation: None,
        });
    }

    let translator = models
        .translator()
        .await
        .map_err(PipelineError::ModelLoad)?;
    let sp = ui.new_spinner(&ProgressConfig {
        emoji: "🌐",
        msg: "Translating",
        done_msg: "Translated",
    });
    let translation = translator.translate(&raw_text).await;
    match &translation {
        Ok(text) => {
            sp.finish_using_style();
            debug!(chars = text.chars().count(), "Translation succeeded");
        }
        Err(err) => {
            sp.abandon_with_message("Translation failed");
            warn!(kind = err.kind(), "Translation failed: {:?}", err);
        }
    }
    presenter.translation(&translation);

    Ok(PipelineOutcome {
        raw_text,
        translation: Some(translation),
    })
}

/// Run OCR on a temporary copy of the upload, and join the fragments.
async fn recognize(
    ui: &Ui,
    models: &dyn ModelProvider,
    upload: &UploadedImage,
) -> Result<String, PipelineError> {
    let engine = models
        .ocr_engine()
        .await
        .map_err(PipelineError::ModelLoad)?;

    // The temporary file is removed when `temp` goes out of scope, whether
    // or not OCR succeeds.
    let temp = upload.to_temporary_jpeg().map_err(PipelineError::Upload)?;
    let sp = ui.new_spinner(&ProgressConfig {
        emoji: "🔍",
        msg: "Recognizing text",
        done_msg: "Recognized text",
    });
    let fragments = engine.recognize(temp.path()).await;
    drop(temp);

    match fragments {
        Ok(fragments) => {
            sp.finish_using_style();
            Ok(assemble(&fragments))
        }
        Err(err) => {
            sp.abandon_with_message("Text recognition failed");
            Err(PipelineError::Ocr(err))
        }
    }
}

/// Borrowing wrapper so a [`PipelineError`] can be logged with its whole
/// cause chain.
struct PipelineErrorChain<'a>(&'a PipelineError);

impl fmt::Debug for PipelineErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = error::Error::source(self.0);
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}
