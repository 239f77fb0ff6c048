//! Machine-readable output: one JSON object per upload, one per line.

use std::io::{self, Write};

use serde::Serialize;

use super::Presenter;
use crate::{
    pipeline::PipelineError, prelude::*, translate::TranslationError,
    upload::UploadedImage,
};

/// Everything we learned about one upload.
#[derive(Debug, Default, Serialize)]
pub struct UploadReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<TranslationReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

#[derive(Debug, Serialize)]
pub struct ImageReport {
    pub name: String,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TranslationReport {
    Success { text: String },
    Failed { kind: &'static str, message: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub message: String,
}

/// Collects an [`UploadReport`] and writes it when the upload is finished.
pub struct JsonPresenter<W> {
    out: W,
    report: UploadReport,
}

impl JsonPresenter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> JsonPresenter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            report: UploadReport::default(),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Presenter for JsonPresenter<W> {
    fn image(&mut self, upload: &UploadedImage) {
        self.report.image = Some(ImageReport {
            name: upload.name.clone(),
            mime_type: upload.mime_type,
            width: upload.image.width(),
            height: upload.image.height(),
        });
    }

    fn ocr_text(&mut self, raw_text: &str) {
        self.report.ocr_text = Some(raw_text.to_owned());
    }

    fn translation(&mut self, outcome: &Result<String, TranslationError>) {
        self.report.translation = Some(match outcome {
            Ok(text) => TranslationReport::Success { text: text.clone() },
            Err(err) => TranslationReport::Failed {
                kind: err.kind(),
                message: err.user_message().to_owned(),
            },
        });
    }

    fn failure(&mut self, err: &PipelineError) {
        self.report.error = Some(ErrorReport {
            kind: err.kind(),
            message: err.user_message(),
        });
    }

    fn finish(&mut self) {
        let report = std::mem::take(&mut self.report);
        if let Err(err) = write_line(&mut self.out, &report) {
            warn!("Cannot write output: {err}");
        }
    }
}

fn write_line<W: Write>(out: &mut W, report: &UploadReport) -> io::Result<()> {
    serde_json::to_writer(&mut *out, report)?;
    writeln!(out)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::upload::tests::png_bytes;

    fn lines(presenter: JsonPresenter<Vec<u8>>) -> Vec<Value> {
        String::from_utf8(presenter.into_inner())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn writes_one_report_per_upload() {
        let upload =
            UploadedImage::from_bytes("sign.png".to_owned(), &png_bytes(3, 7)).unwrap();
        let mut presenter = JsonPresenter::new(vec![]);

        presenter.image(&upload);
        presenter.ocr_text("नमस्ते");
        presenter.translation(&Ok("Hello".to_owned()));
        presenter.finish();

        presenter.failure(&PipelineError::Ocr(anyhow!("boom")));
        presenter.finish();

        let reports = lines(presenter);
        assert_eq!(reports.len(), 2);
        assert_eq!(
            reports[0],
            json!({
                "image": {"name": "sign.png", "mime_type": "image/png", "width": 3, "height": 7},
                "ocr_text": "नमस्ते",
                "translation": {"status": "success", "text": "Hello"},
            })
        );
        assert_eq!(reports[1]["error"]["kind"], "ocr");
        assert!(reports[1].get("image").is_none());
    }

    #[test]
    fn translation_failures_are_reported_inside_the_translation() {
        let mut presenter = JsonPresenter::new(vec![]);
        presenter.ocr_text("क");
        presenter.translation(&Err(TranslationError::Decode(anyhow!("bad id"))));
        presenter.finish();

        let reports = lines(presenter);
        assert_eq!(reports[0]["translation"]["status"], "failed");
        assert_eq!(reports[0]["translation"]["kind"], "decode");
        assert!(reports[0].get("error").is_none());
    }
}
