//! Tokenizers for Marian checkpoints published with SentencePiece models.
//!
//! These checkpoints ship one SentencePiece model per language
//! (`source.spm`, `target.spm`) and a shared `vocab.json`. The SentencePiece
//! model decides how text is split into pieces, and `vocab.json` decides
//! which model id each piece gets. We rebuild that as a `tokenizers`
//! Unigram model whose ids follow `vocab.json`.

use std::collections::HashMap;

use prost::Message as _;
use tokenizers::{
    AddedToken, Tokenizer,
    models::unigram::Unigram,
    normalizers::unicode::NFKC,
    pre_tokenizers::metaspace::{Metaspace, PrependScheme},
};

use crate::prelude::*;

/// Marian's unknown token.
const UNK: &str = "<unk>";

/// Marian's special tokens, which are never produced by segmentation and are
/// dropped when decoding.
const SPECIAL_TOKENS: &[&str] = &["</s>", UNK, "<pad>"];

/// Score for vocabulary entries which the SentencePiece model doesn't
/// contain, such as target-language pieces in a shared vocabulary. They are
/// only used when nothing else matches.
const FOREIGN_PIECE_SCORE: f64 = -1.0e4;

/// SentencePiece piece types which take part in segmentation.
const NORMAL: i32 = 1;
const USER_DEFINED: i32 = 4;

/// The parts of SentencePiece's `ModelProto` we read. Other fields are
/// skipped while decoding.
#[derive(Clone, PartialEq, prost::Message)]
struct ModelProto {
    #[prost(message, repeated, tag = "1")]
    pieces: Vec<SentencePiece>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct SentencePiece {
    #[prost(string, optional, tag = "1")]
    piece: Option<String>,
    #[prost(float, optional, tag = "2")]
    score: Option<f32>,
    #[prost(int32, optional, tag = "3")]
    kind: Option<i32>,
}

/// Build a tokenizer from a SentencePiece model and a Marian `vocab.json`.
#[instrument(level = "debug", skip_all, fields(spm = %spm_path.display()))]
pub fn load_tokenizer(spm_path: &Path, vocab_path: &Path) -> Result<Tokenizer> {
    let spm = std::fs::read(spm_path)
        .with_context(|| format!("cannot read SentencePiece model {:?}", spm_path))?;
    let scores = read_piece_scores(&spm)
        .with_context(|| format!("cannot parse SentencePiece model {:?}", spm_path))?;
    let vocab = std::fs::read_to_string(vocab_path)
        .with_context(|| format!("cannot read vocabulary {:?}", vocab_path))?;
    let vocab = read_vocab(&vocab)
        .with_context(|| format!("cannot parse vocabulary {:?}", vocab_path))?;
    debug!(
        pieces = scores.len(),
        vocab = vocab.len(),
        "Building SentencePiece tokenizer"
    );
    build_tokenizer(&scores, &vocab)
}

/// Read the segmentation score of every usable piece.
fn read_piece_scores(data: &[u8]) -> Result<HashMap<String, f64>> {
    let model = ModelProto::decode(data)?;
    let scores = model
        .pieces
        .into_iter()
        .filter(|p| matches!(p.kind.unwrap_or(NORMAL), NORMAL | USER_DEFINED))
        .filter_map(|p| Some((p.piece?, f64::from(p.score.unwrap_or(0.0)))))
        .collect::<HashMap<_, _>>();
    if scores.is_empty() {
        return Err(anyhow!("model has no pieces"));
    }
    Ok(scores)
}

/// Read `vocab.json`, returning pieces indexed by id.
fn read_vocab(data: &str) -> Result<Vec<String>> {
    let ids = serde_json::from_str::<HashMap<String, u32>>(data)?;
    let mut pieces: Vec<Option<String>> = vec![None; ids.len()];
    for (piece, id) in ids {
        let slot = pieces
            .get_mut(id as usize)
            .ok_or_else(|| anyhow!("id {id} of {piece:?} is out of range"))?;
        if let Some(other) = slot.replace(piece) {
            return Err(anyhow!("id {id} is used by more than one piece, including {other:?}"));
        }
    }
    pieces
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| anyhow!("ids are not contiguous"))
}

fn build_tokenizer(scores: &HashMap<String, f64>, vocab: &[String]) -> Result<Tokenizer> {
    let unk_id = vocab
        .iter()
        .position(|piece| piece == UNK)
        .ok_or_else(|| anyhow!("vocabulary has no {UNK} token"))?;
    let entries = vocab
        .iter()
        .map(|piece| {
            let score = scores.get(piece).copied().unwrap_or(FOREIGN_PIECE_SCORE);
            (piece.to_owned(), score)
        })
        .collect::<Vec<_>>();
    let model = Unigram::from(entries, Some(unk_id), false).map_err(anyhow::Error::msg)?;

    // SentencePiece marks word starts with U+2581 and adds one before the
    // first word.
    let metaspace = Metaspace::new('▁', PrependScheme::Always, true);
    let mut tokenizer = Tokenizer::new(model);
    tokenizer
        .with_normalizer(Some(NFKC))
        .with_pre_tokenizer(Some(metaspace.clone()))
        .with_decoder(Some(metaspace));
    let special = SPECIAL_TOKENS
        .iter()
        .filter(|&&token| vocab.iter().any(|piece| piece == token))
        .map(|&token| AddedToken::from(token, true))
        .collect::<Vec<_>>();
    tokenizer.add_special_tokens(&special);
    Ok(tokenizer)
}

#[cfg(test)]
mod tests {
    use prost::Message as _;
    use serde_json::json;

    use super::*;

    fn piece(piece: &str, score: f32, kind: i32) -> SentencePiece {
        SentencePiece {
            piece: Some(piece.to_owned()),
            score: Some(score),
            kind: Some(kind),
        }
    }

    /// A tiny Nepali model, written to disk the way the hub ships it.
    fn write_model(dir: &Path) -> (PathBuf, PathBuf) {
        let model = ModelProto {
            pieces: vec![
                piece(UNK, 0.0, 2),
                piece("</s>", 0.0, 3),
                piece("▁नमस्ते", -1.0, NORMAL),
                piece("▁सं", -2.0, NORMAL),
                piece("सार", -2.0, NORMAL),
                piece("▁", -3.0, NORMAL),
            ],
        };
        let spm_path = dir.join("source.spm");
        std::fs::write(&spm_path, model.encode_to_vec()).unwrap();

        let vocab = json!({
            "</s>": 0,
            "<unk>": 1,
            "▁नमस्ते": 2,
            "▁सं": 3,
            "सार": 4,
            "▁": 5,
            "▁Hello": 6,
            "<pad>": 7,
        });
        let vocab_path = dir.join("vocab.json");
        std::fs::write(&vocab_path, vocab.to_string()).unwrap();
        (spm_path, vocab_path)
    }

    #[test]
    fn segments_with_spm_and_numbers_with_vocab() {
        let dir = tempfile::TempDir::with_prefix("spm").unwrap();
        let (spm_path, vocab_path) = write_model(dir.path());
        let tokenizer = load_tokenizer(&spm_path, &vocab_path).unwrap();

        let encoding = tokenizer.encode("नमस्ते संसार", false).unwrap();
        assert_eq!(encoding.get_ids(), [2, 3, 4]);

        let unknown = tokenizer.encode("xyz", false).unwrap();
        assert!(unknown.get_ids().contains(&1), "{:?}", unknown.get_ids());
    }

    #[test]
    fn decoding_restores_spaces_and_drops_special_tokens() {
        let dir = tempfile::TempDir::with_prefix("spm").unwrap();
        let (spm_path, vocab_path) = write_model(dir.path());
        let tokenizer = load_tokenizer(&spm_path, &vocab_path).unwrap();

        let text = tokenizer.decode(&[7, 2, 3, 4, 0], true).unwrap();
        assert_eq!(text, "नमस्ते संसार");
    }

    #[test]
    fn vocab_ids_must_be_contiguous() {
        assert_eq!(
            read_vocab(r#"{"</s>": 0, "<unk>": 1}"#).unwrap(),
            vec!["</s>", "<unk>"]
        );
        assert!(read_vocab(r#"{"</s>": 0, "<unk>": 2}"#).is_err());
        assert!(read_vocab(r#"{"</s>": 0, "<unk>": 0}"#).is_err());
    }

    #[test]
    fn garbage_is_not_a_sentencepiece_model() {
        let dir = tempfile::TempDir::with_prefix("spm").unwrap();
        let (_, vocab_path) = write_model(dir.path());
        let bogus = dir.path().join("bogus.spm");
        std::fs::write(&bogus, b"\xff\xff\xff\xff not protobuf").unwrap();
        assert!(load_tokenizer(&bogus, &vocab_path).is_err());
    }
}
