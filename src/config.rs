//! Configuration file support.
//!
//! Every field has a default, so an empty file (or no file at all) gives a
//! working Nepali-to-English setup.

use serde::Deserialize;

use crate::{async_utils::io::read_json_or_toml, prelude::*};

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// OCR engine settings.
    pub ocr: OcrConfig,

    /// Translation model settings.
    pub translation: TranslationConfig,
}

impl AppConfig {
    /// Load a config file. Files ending in `.json` are parsed as JSON, and
    /// everything else as TOML.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self> {
        let config = read_json_or_toml::<AppConfig>(path).await?;
        debug!("Loaded config: {:?}", config);
        Ok(config)
    }
}

/// Settings for the `tesseract` OCR engine.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OcrConfig {
    /// The `tesseract` binary to run.
    pub tesseract: PathBuf,

    /// Tesseract language codes. All of them are used at once.
    pub languages: Vec<String>,

    /// Tesseract's `--psm` value. Tesseract picks its own default if unset.
    pub page_segmentation_mode: Option<u8>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract: PathBuf::from("tesseract"),
            languages: vec!["nep".to_owned(), "eng".to_owned()],
            page_segmentation_mode: None,
        }
    }
}

impl OcrConfig {
    /// The language list in the form `tesseract -l` expects.
    pub fn language_arg(&self) -> String {
        self.languages.join("+")
    }
}

/// Settings for the Marian translation model.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranslationConfig {
    /// Hugging Face repository to fetch model files from.
    pub repo: String,

    /// Repository revision (branch, tag or commit).
    pub revision: String,

    /// Base URL of the model hub.
    pub hub_endpoint: String,

    /// Read all model files from this directory and never download.
    pub model_dir: Option<PathBuf>,

    /// Where downloaded model files are kept. Defaults to the per-user
    /// cache directory.
    pub cache_dir: Option<PathBuf>,

    /// Source-language tokenizer, in `tokenizer.json` format. When both
    /// tokenizers are unset, the repository's `source.spm`, `target.spm` and
    /// `vocab.json` are used instead.
    pub source_tokenizer: Option<String>,

    /// Target-language tokenizer, in `tokenizer.json` format.
    pub target_tokenizer: Option<String>,

    /// Maximum number of input tokens, including end-of-sequence. Defaults
    /// to the model's `max_position_embeddings`.
    pub max_input_tokens: Option<usize>,

    /// Maximum number of tokens to generate.
    pub max_new_tokens: usize,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            repo: "Helsinki-NLP/opus-mt-ne-en".to_owned(),
            revision: "main".to_owned(),
            hub_endpoint: "https://huggingface.co".to_owned(),
            model_dir: None,
            cache_dir: None,
            source_tokenizer: None,
            target_tokenizer: None,
            max_input_tokens: None,
            max_new_tokens: 512,
        }
    }
}

impl TranslationConfig {
    /// The directory downloaded files for this repository and revision are
    /// cached in.
    pub fn resolved_cache_dir(&self) -> Result<PathBuf> {
        let base = match &self.cache_dir {
            Some(dir) => dir.to_owned(),
            None => dirs::cache_dir()
                .ok_or_else(|| anyhow!("cannot determine a cache directory"))?
                .join("nepali-ocr-translator"),
        };
        Ok(base
            .join(self.repo.replace('/', "--"))
            .join(&self.revision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.ocr.language_arg(), "nep+eng");
        assert_eq!(config.translation.repo, "Helsinki-NLP/opus-mt-ne-en");
        assert_eq!(config.translation.max_new_tokens, 512);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config: AppConfig = toml::from_str(
            r#"
            [ocr]
            languages = ["nep"]
            page_segmentation_mode = 6

            [translation]
            max_input_tokens = 128
            "#,
        )
        .unwrap();
        assert_eq!(config.ocr.language_arg(), "nep");
        assert_eq!(config.ocr.page_segmentation_mode, Some(6));
        assert_eq!(config.ocr.tesseract, PathBuf::from("tesseract"));
        assert_eq!(config.translation.max_input_tokens, Some(128));
        assert_eq!(config.translation.revision, "main");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = toml::from_str::<AppConfig>("[ocr]\nlanguage = \"nep\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn cache_dir_is_scoped_by_repo_and_revision() {
        let config = TranslationConfig {
            cache_dir: Some(PathBuf::from("/tmp/models")),
            ..TranslationConfig::default()
        };
        assert_eq!(
            config.resolved_cache_dir().unwrap(),
            PathBuf::from("/tmp/models/Helsinki-NLP--opus-mt-ne-en/main")
        );
    }
}
