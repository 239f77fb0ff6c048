//! Tesseract OCR engine.

use serde::Deserialize;
use tokio::process::Command;

use crate::{async_utils::check_for_command_failure, config::OcrConfig, prelude::*};

use super::OcrEngine;

/// TSV row level for a single word.
const WORD_LEVEL: u32 = 5;

/// OCR engine wrapping the `tesseract` CLI tool.
///
/// Fragments are Tesseract's text lines, in the order Tesseract's page layout
/// analysis lists them. That is usually top-to-bottom within each detected
/// block, but multi-column and rotated layouts may come out in a different
/// order than a human would read them.
#[derive(Debug)]
pub struct TesseractOcrEngine {
    config: OcrConfig,
}

impl TesseractOcrEngine {
    /// Create a new `tesseract` engine, checking that the binary runs and
    /// that every configured language pack is installed.
    #[instrument(level = "debug", skip_all)]
    pub async fn new(config: &OcrConfig) -> Result<Self> {
        if config.languages.is_empty() {
            return Err(anyhow!("no OCR languages configured"));
        }

        let output = Command::new(&config.tesseract)
            .arg("--list-langs")
            .output()
            .await
            .with_context(|| format!("cannot run {:?}", config.tesseract))?;
        check_for_command_failure("tesseract", &output)?;

        // Depending on the version, the list goes to stdout or stderr.
        let mut listing = String::from_utf8_lossy(&output.stdout).into_owned();
        listing.push_str(&String::from_utf8_lossy(&output.stderr));
        let installed = parse_language_list(&listing);
        let missing = config
            .languages
            .iter()
            .filter(|lang| !installed.contains(lang))
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(anyhow!(
                "tesseract language packs not installed: {} (installed: {})",
                missing.join(", "),
                installed.join(", "),
            ));
        }

        info!(languages = %config.language_arg(), "Tesseract is ready");
        Ok(Self {
            config: config.to_owned(),
        })
    }
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    #[instrument(level = "debug", skip_all, fields(path = %image_path.display()))]
    async fn recognize(&self, image_path: &Path) -> Result<Vec<String>> {
        let mut cmd = Command::new(&self.config.tesseract);
        cmd.arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(self.config.language_arg());
        if let Some(psm) = self.config.page_segmentation_mode {
            cmd.arg("--psm").arg(psm.to_string());
        }
        let output = cmd.arg("tsv").output().await.context("cannot run tesseract")?;
        check_for_command_failure("tesseract", &output)?;

        let tsv = String::from_utf8(output.stdout)
            .context("tesseract output is not valid UTF-8")?;
        let fragments = fragments_from_tsv(&tsv)?;
        debug!(count = fragments.len(), "Recognized text fragments");
        Ok(fragments)
    }
}

/// Parse the output of `tesseract --list-langs`.
fn parse_language_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of available"))
        .map(|line| line.to_owned())
        .collect()
}

/// One row of Tesseract's TSV output.
#[derive(Debug, Deserialize)]
struct TsvRow {
    level: u32,
    page_num: u32,
    block_num: u32,
    par_num: u32,
    line_num: u32,
    #[serde(default)]
    text: String,
}

/// Group Tesseract's TSV word rows into one fragment per text line.
fn fragments_from_tsv(tsv: &str) -> Result<Vec<String>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .from_reader(tsv.as_bytes());

    let mut fragments: Vec<String> = vec![];
    let mut current_line = None;
    for row in rdr.deserialize::<TsvRow>() {
        let row = row.context("cannot parse tesseract TSV output")?;
        let word = row.text.trim();
        if row.level != WORD_LEVEL || word.is_empty() {
            continue;
        }
        let line = (row.page_num, row.block_num, row.par_num, row.line_num);
        match fragments.last_mut() {
            Some(fragment) if current_line == Some(line) => {
                fragment.push(' ');
                fragment.push_str(word);
            }
            _ => {
                fragments.push(word.to_owned());
                current_line = Some(line);
            }
        }
    }
    Ok(fragments)
}
