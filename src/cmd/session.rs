//! The `session` subcommand.

use std::io::{IsTerminal as _, Write as _};

use clap::Args;
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, BufReader};

use super::DisplayOpts;
use crate::{
    config::AppConfig,
    models::{ModelProvider, SharedModels},
    pipeline,
    prelude::*,
    present::Presenter,
    ui::Ui,
};

#[derive(Debug, Args)]
pub struct SessionOpts {
    /// Load the OCR engine and translation model before reading the first
    /// image path.
    #[clap(long)]
    preload: bool,
}

/// The `session` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_session(
    ui: Ui,
    config: &AppConfig,
    display: &DisplayOpts,
    opts: &SessionOpts,
) -> Result<()> {
    let models = SharedModels::new(ui.clone(), config);
    if opts.preload {
        models.preload().await?;
    }
    let mut presenter = display.presenter();
    let stdin = BufReader::new(tokio::io::stdin());
    let interactive = std::io::stdin().is_terminal();
    let summary =
        run_session(&ui, &models, stdin, presenter.as_mut(), interactive).await?;
    info!(
        processed = summary.processed,
        failed = summary.failed,
        "Session finished"
    );
    Ok(())
}

/// How a session went.
#[derive(Debug, Default, PartialEq, Eq)]
struct SessionSummary {
    processed: usize,
    failed: usize,
}

/// Process image paths from `input`, one per line, until `quit`, `exit` or
/// end of input. Failed uploads are reported and skipped, unless models
/// could not be loaded.
async fn run_session<R>(
    ui: &Ui,
    models: &dyn ModelProvider,
    input: R,
    presenter: &mut dyn Presenter,
    interactive: bool,
) -> Result<SessionSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut summary = SessionSummary::default();
    loop {
        if interactive {
            prompt(ui);
        }
        let Some(line) = lines
            .next_line()
            .await
            .context("cannot read image path")?
        else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "quit" | "exit" => break,
            // Standard input is already carrying our image paths.
            "-" => {
                warn!("Cannot read an image from standard input during a session");
                summary.failed += 1;
                continue;
            }
            _ => {}
        }

        match pipeline::process_upload(ui, models, Path::new(line), presenter).await {
            Ok(_) => summary.processed += 1,
            Err(err) if err.is_fatal() => {
                return Err(err).context("cannot continue session");
            }
            Err(_) => summary.failed += 1,
        }
    }
    Ok(summary)
}

fn prompt(ui: &Ui) {
    let mut stderr = ui.get_stderr_writer();
    if let Err(err) = write!(stderr, "Image path (`quit` to exit): ")
        .and_then(|()| stderr.flush())
    {
        warn!("Cannot write prompt: {err}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        ocr::OcrEngine,
        present::json::JsonPresenter,
        translate::{TranslationError, Translator},
        upload::tests::png_bytes,
    };

    struct FixedText;

    #[async_trait]
    impl OcrEngine for FixedText {
        async fn recognize(&self, _image_path: &Path) -> Result<Vec<String>> {
            Ok(vec!["नमस्ते".to_owned()])
        }
    }

    #[async_trait]
    impl Translator for FixedText {
        async fn translate(&self, _text: &str) -> Result<String, TranslationError> {
            Ok("Hello".to_owned())
        }
    }

    struct Models {
        broken: bool,
    }

    #[async_trait]
    impl ModelProvider for Models {
        async fn ocr_engine(&self) -> Result<Arc<dyn OcrEngine>> {
            if self.broken {
                Err(anyhow!("tesseract not found"))
            } else {
                Ok(Arc::new(FixedText))
            }
        }

        async fn translator(&self) -> Result<Arc<dyn Translator>> {
            Ok(Arc::new(FixedText))
        }
    }

    #[tokio::test]
    async fn keeps_going_after_a_bad_upload() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("session")?;
        let good = dir.path().join("sign.png");
        std::fs::write(&good, png_bytes(4, 4))?;
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"not an image")?;

        let input = format!(
            "{}\n\n  {}  \nquit\n{}\n",
            bad.display(),
            good.display(),
            good.display()
        );
        let mut presenter = JsonPresenter::new(vec![]);
        let summary = run_session(
            &Ui::init_for_tests(),
            &Models { broken: false },
            input.as_bytes(),
            &mut presenter,
            false,
        )
        .await?;
        assert_eq!(
            summary,
            SessionSummary {
                processed: 1,
                failed: 1
            }
        );

        let output = String::from_utf8(presenter.into_inner())?;
        let reports = output.lines().collect::<Vec<_>>();
        assert_eq!(reports.len(), 2);
        assert!(reports[0].contains(r#""kind":"upload""#));
        assert!(reports[1].contains(r#""text":"Hello""#));
        Ok(())
    }

    #[tokio::test]
    async fn ends_at_end_of_input() -> Result<()> {
        let mut presenter = JsonPresenter::new(vec![]);
        let summary = run_session(
            &Ui::init_for_tests(),
            &Models { broken: false },
            &b"\n\n"[..],
            &mut presenter,
            false,
        )
        .await?;
        assert_eq!(summary, SessionSummary::default());
        Ok(())
    }

    #[tokio::test]
    async fn model_load_failure_ends_the_session() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("session")?;
        let good = dir.path().join("sign.png");
        std::fs::write(&good, png_bytes(4, 4))?;

        let input = format!("{0}\n{0}\n", good.display());
        let mut presenter = JsonPresenter::new(vec![]);
        let result = run_session(
            &Ui::init_for_tests(),
            &Models { broken: true },
            input.as_bytes(),
            &mut presenter,
            false,
        )
        .await;
        assert!(result.is_err());

        let output = String::from_utf8(presenter.into_inner())?;
        assert_eq!(output.lines().count(), 1);
        assert!(output.contains(r#""kind":"model_load""#));
        Ok(())
    }
}
