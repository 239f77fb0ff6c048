//! Machine translation interface.

use std::{error, fmt};

use crate::prelude::*;

pub mod hub;
pub mod marian;
pub mod spm;

/// Interface to a translation model.
///
/// Like [`crate::ocr::OcrEngine`], translators are loaded once and shared
/// between uploads.
#[async_trait]
pub trait Translator: Send + Sync + 'static {
    /// Translate a non-empty text.
    async fn translate(&self, text: &str) -> Result<String, TranslationError>;
}

/// Which translation step failed.
#[derive(Debug)]
pub enum TranslationError {
    /// The input could not be turned into model tokens.
    Tokenize(anyhow::Error),

    /// The model failed while generating output tokens.
    Generate(anyhow::Error),

    /// The output tokens could not be turned back into text.
    Decode(anyhow::Error),
}

impl TranslationError {
    /// A message for the user. Deliberately leaves out the underlying cause,
    /// which goes to the log instead.
    pub fn user_message(&self) -> &'static str {
        match self {
            TranslationError::Tokenize(_) => {
                "Translation failed: the recognized text could not be prepared for the model."
            }
            TranslationError::Generate(_) => {
                "Translation failed: the model could not produce a translation. Try with simpler text or shorter input."
            }
            TranslationError::Decode(_) => {
                "Translation failed: the model's output could not be turned back into text."
            }
        }
    }

    /// A short, stable name for this kind of failure.
    pub fn kind(&self) -> &'static str {
        match self {
            TranslationError::Tokenize(_) => "tokenize",
            TranslationError::Generate(_) => "generate",
            TranslationError::Decode(_) => "decode",
        }
    }
}

impl fmt::Display for TranslationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationError::Tokenize(err) => write!(f, "tokenization failed: {err}"),
            TranslationError::Generate(err) => write!(f, "generation failed: {err}"),
            TranslationError::Decode(err) => write!(f, "decoding failed: {err}"),
        }
    }
}

impl error::Error for TranslationError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        let err = match self {
            TranslationError::Tokenize(err)
            | TranslationError::Generate(err)
            | TranslationError::Decode(err) => err,
        };
        let err: &(dyn error::Error + 'static) = err.as_ref();
        Some(err)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn each_failure_has_its_own_message() {
        let errors = [
            TranslationError::Tokenize(anyhow!("bad input")),
            TranslationError::Generate(anyhow!("shape mismatch")),
            TranslationError::Decode(anyhow!("unknown id")),
        ];
        let messages = errors.iter().map(|e| e.user_message()).collect::<Vec<_>>();
        assert_ne!(messages[0], messages[1]);
        assert_ne!(messages[1], messages[2]);
        assert_ne!(messages[0], messages[2]);
        for (err, msg) in errors.iter().zip(&messages) {
            assert!(msg.starts_with("Translation failed"));
            // Causes are for the log, not the user.
            assert!(!msg.contains(&err.source().unwrap().to_string()));
        }
    }
}
