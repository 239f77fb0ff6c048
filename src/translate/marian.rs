//! Marian sequence-to-sequence translation, run locally with `candle`.

use std::{
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::marian;
use serde_json::{Map, Value};
use tokenizers::{PaddingParams, Tokenizer};

use crate::{
    async_utils::spawn_blocking_catching_panics,
    config::TranslationConfig,
    prelude::*,
    ui::Ui,
};

use super::{TranslationError, Translator, hub::ModelFiles, spm};

/// A Marian model plus its source and target tokenizers.
pub struct MarianTranslator {
    inner: Arc<MarianInner>,
}

/// The parts of [`MarianTranslator`] used on the blocking thread.
struct MarianInner {
    /// The model. Generation mutates its KV cache, so callers take turns.
    model: Mutex<marian::MTModel>,
    config: marian::Config,
    source: Tokenizer,
    target: Tokenizer,
    device: Device,
    max_input_tokens: usize,
    max_new_tokens: usize,
}

impl MarianTranslator {
    /// Fetch (if needed) and load the model and tokenizers.
    #[instrument(level = "debug", skip_all, fields(repo = %config.repo))]
    pub async fn load(ui: Ui, config: &TranslationConfig) -> Result<Self> {
        let files = ModelFiles::new(ui, config)?;
        let config_path = files.get("config.json").await?;
        let weights = match files.get_optional("model.safetensors").await? {
            Some(path) => Weights::SafeTensors(path),
            None => Weights::Pth(files.get("pytorch_model.bin").await?),
        };
        let tokenizers = TokenizerFiles::find(&files, config).await?;

        let settings = config.to_owned();
        let inner = spawn_blocking_catching_panics(move || {
            MarianInner::load(&config_path, &weights, &tokenizers, &settings)
        })
        .await??;
        info!(
            max_input_tokens = inner.max_input_tokens,
            "Translation model is ready"
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }
}

#[async_trait]
impl Translator for MarianTranslator {
    #[instrument(level = "debug", skip_all, fields(chars = text.chars().count()))]
    async fn translate(&self, text: &str) -> Result<String, TranslationError> {
        let inner = self.inner.clone();
        let text = text.to_owned();
        spawn_blocking_catching_panics(move || inner.translate(&text))
            .await
            .map_err(TranslationError::Generate)?
    }
}

/// Model weight files, in the formats we can read.
enum Weights {
    SafeTensors(PathBuf),
    Pth(PathBuf),
}

/// Tokenizer files, in the formats we can read.
enum TokenizerFiles {
    /// A pair of `tokenizer.json` files.
    Json { source: PathBuf, target: PathBuf },

    /// SentencePiece models plus the shared `vocab.json`, as published with
    /// most Marian checkpoints.
    SentencePiece {
        source: PathBuf,
        target: PathBuf,
        vocab: PathBuf,
    },
}

impl TokenizerFiles {
    /// Locate the configured tokenizer files, or the SentencePiece files if
    /// none are configured.
    async fn find(files: &ModelFiles, config: &TranslationConfig) -> Result<Self> {
        match (&config.source_tokenizer, &config.target_tokenizer) {
            (Some(source), Some(target)) => Ok(TokenizerFiles::Json {
                source: files.get(source).await?,
                target: files.get(target).await?,
            }),
            (None, None) => Ok(TokenizerFiles::SentencePiece {
                source: files.get("source.spm").await?,
                target: files.get("target.spm").await?,
                vocab: files.get("vocab.json").await?,
            }),
            _ => Err(anyhow!(
                "source_tokenizer and target_tokenizer must be set together"
            )),
        }
    }

    /// Load the source and target tokenizers.
    fn load(&self) -> Result<(Tokenizer, Tokenizer)> {
        match self {
            TokenizerFiles::Json { source, target } => {
                Ok((load_json_tokenizer(source)?, load_json_tokenizer(target)?))
            }
            TokenizerFiles::SentencePiece {
                source,
                target,
                vocab,
            } => Ok((
                spm::load_tokenizer(source, vocab)?,
                spm::load_tokenizer(target, vocab)?,
            )),
        }
    }
}

impl MarianInner {
    fn load(
        config_path: &Path,
        weights: &Weights,
        tokenizers: &TokenizerFiles,
        settings: &TranslationConfig,
    ) -> Result<Self> {
        let config = read_model_config(config_path)?;
        let device = Device::Cpu;

        let vb = match weights {
            Weights::SafeTensors(path) => {
                let tensors = candle_core::safetensors::load(path, &device)
                    .with_context(|| format!("cannot read weights from {:?}", path))?;
                VarBuilder::from_tensors(tensors, DType::F32, &device)
            }
            Weights::Pth(path) => VarBuilder::from_pth(path, DType::F32, &device)
                .with_context(|| format!("cannot read weights from {:?}", path))?,
        };
        let model = marian::MTModel::new(&config, vb)
            .context("model weights do not match the model config")?;

        let (mut source, target) = tokenizers.load()?;
        let pad_token = source
            .id_to_token(config.pad_token_id)
            .unwrap_or_else(|| "<pad>".to_owned());
        // Only one sequence is ever encoded at a time, so padding never adds
        // tokens. It matters if batching is ever added.
        source.with_padding(Some(PaddingParams {
            pad_id: config.pad_token_id,
            pad_token,
            ..PaddingParams::default()
        }));

        let max_input_tokens = settings
            .max_input_tokens
            .unwrap_or(config.max_position_embeddings)
            .min(config.max_position_embeddings);
        if max_input_tokens < 2 {
            return Err(anyhow!("max_input_tokens must be at least 2"));
        }

        Ok(Self {
            model: Mutex::new(model),
            config,
            source,
            target,
            device,
            max_input_tokens,
            max_new_tokens: settings.max_new_tokens,
        })
    }

    /// Run all three translation steps.
    fn translate(&self, text: &str) -> Result<String, TranslationError> {
        run_steps(
            text,
            |text| self.tokenize(text),
            |input_ids| self.generate(input_ids),
            |output_ids| self.decode(output_ids),
        )
    }

    /// Encode `text`, truncated to fit the model.
    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .source
            .encode(text, true)
            .map_err(anyhow::Error::msg)?;
        let ids = encoding.get_ids();
        let input_ids =
            truncate_with_eos(ids, self.max_input_tokens, self.config.eos_token_id);
        if input_ids.len() < ids.len() {
            info!(
                tokens = ids.len(),
                kept = input_ids.len(),
                "Input is longer than the model allows; translating the beginning only"
            );
        }
        Ok(input_ids)
    }

    /// Greedy generation.
    fn generate(&self, input_ids: &[u32]) -> Result<Vec<u32>> {
        // A panic mid-generation poisons the lock. The cache is reset below,
        // so the model itself is still usable.
        let mut model = self
            .model
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        model.reset_kv_cache();
        let result = self.generate_with(&mut model, input_ids);
        model.reset_kv_cache();
        result
    }

    fn generate_with(
        &self,
        model: &mut marian::MTModel,
        input_ids: &[u32],
    ) -> Result<Vec<u32>> {
        let input = Tensor::new(input_ids, &self.device)?.unsqueeze(0)?;
        let encoder_xs = model.encoder().forward(&input, 0)?;

        let mut output_ids = vec![self.config.decoder_start_token_id];
        for index in 0..self.max_new_tokens {
            // After the first step, the KV cache holds everything but the
            // newest token.
            let context_size = if index >= 1 { 1 } else { output_ids.len() };
            let start_pos = output_ids.len().saturating_sub(context_size);
            let decoder_input = Tensor::new(&output_ids[start_pos..], &self.device)?
                .unsqueeze(0)?;
            let logits = model.decode(&decoder_input, &encoder_xs, start_pos)?;
            let logits = logits.squeeze(0)?;
            let logits = logits.get(logits.dim(0)? - 1)?;
            let logits = logits.to_dtype(DType::F32)?.to_vec1::<f32>()?;

            let token = greedy_next_token(&logits, self.config.pad_token_id)
                .ok_or_else(|| anyhow!("model returned no usable logits"))?;
            output_ids.push(token);
            if token == self.config.eos_token_id || token == self.config.forced_eos_token_id
            {
                break;
            }
        }
        trace!(tokens = output_ids.len(), "Generated output tokens");
        Ok(output_ids)
    }

    /// Turn output ids back into text, dropping special tokens.
    fn decode(&self, output_ids: &[u32]) -> Result<String> {
        self.target
            .decode(output_ids, true)
            .map_err(anyhow::Error::msg)
    }
}

/// Run tokenize, generate and decode in turn. Errors and panics are both
/// reported as the step they came from.
fn run_steps(
    text: &str,
    tokenize: impl FnOnce(&str) -> Result<Vec<u32>>,
    generate: impl FnOnce(&[u32]) -> Result<Vec<u32>>,
    decode: impl FnOnce(&[u32]) -> Result<String>,
) -> Result<String, TranslationError> {
    let input_ids =
        catching_panics(|| tokenize(text)).map_err(TranslationError::Tokenize)?;
    let output_ids =
        catching_panics(|| generate(&input_ids)).map_err(TranslationError::Generate)?;
    catching_panics(|| decode(&output_ids)).map_err(TranslationError::Decode)
}

/// Turn a panic in `step` into an error.
fn catching_panics<T>(step: impl FnOnce() -> Result<T>) -> Result<T> {
    match std::panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(result) => result,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|msg| msg.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            Err(anyhow!("panicked: {msg}"))
        }
    }
}

fn load_json_tokenizer(path: &Path) -> Result<Tokenizer> {
    Tokenizer::from_file(path)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("cannot load tokenizer from {:?}", path))
}

/// Read a Hugging Face `config.json` for a Marian model.
fn read_model_config(path: &Path) -> Result<marian::Config> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read model config {:?}", path))?;
    let mut value: Value = serde_json::from_str(&data)
        .with_context(|| format!("cannot parse model config {:?}", path))?;
    fill_config_defaults(&mut value)?;
    serde_json::from_value(value)
        .with_context(|| format!("unsupported model config {:?}", path))
}

/// Older Marian configs leave out fields which `transformers` fills in with
/// defaults. Fill them in the same way.
fn fill_config_defaults(value: &mut Value) -> Result<()> {
    let obj = value
        .as_object_mut()
        .ok_or_else(|| anyhow!("model config is not a JSON object"))?;
    let pad = required(obj, "pad_token_id")?;
    let eos = required(obj, "eos_token_id")?;
    set_default(obj, "decoder_start_token_id", pad);
    set_default(obj, "forced_eos_token_id", eos);
    for flag in [
        "use_cache",
        "is_encoder_decoder",
        "scale_embedding",
        "share_encoder_decoder_embeddings",
    ] {
        set_default(obj, flag, Value::Bool(true));
    }
    Ok(())
}

fn required(obj: &Map<String, Value>, key: &str) -> Result<Value> {
    obj.get(key)
        .filter(|value| !value.is_null())
        .cloned()
        .ok_or_else(|| anyhow!("model config has no {key}"))
}

fn set_default(obj: &mut Map<String, Value>, key: &str, default: Value) {
    if obj.get(key).is_none_or(Value::is_null) {
        obj.insert(key.to_owned(), default);
    }
}

/// Keep at most `max_len` tokens, the last of which is always `eos`.
fn truncate_with_eos(ids: &[u32], max_len: usize, eos: u32) -> Vec<u32> {
    let ids = ids.strip_suffix(&[eos]).unwrap_or(ids);
    let keep = ids.len().min(max_len.saturating_sub(1));
    let mut truncated = Vec::with_capacity(keep + 1);
    truncated.extend_from_slice(&ids[..keep]);
    truncated.push(eos);
    truncated
}

/// Pick the most likely token, never choosing `banned`.
fn greedy_next_token(logits: &[f32], banned: u32) -> Option<u32> {
    logits
        .iter()
        .enumerate()
        .filter(|&(id, logit)| id as u32 != banned && !logit.is_nan())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(id, _)| id as u32)
}
