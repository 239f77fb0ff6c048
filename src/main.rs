use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod assemble;
mod async_utils;
mod cmd;
mod config;
mod models;
mod ocr;
mod pipeline;
mod prelude;
mod present;
mod translate;
mod ui;
mod upload;

/// OCR an image and translate its Nepali text to English.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Requirements:
  - `tesseract` with the `nep` and `eng` language packs.
  - A Marian Nepali-to-English model. Weights and `config.json` are
    downloaded from the Hugging Face hub on first use, unless
    `translation.model_dir` is set in the config file. Tokenizers must be
    in `tokenizer.json` format.

Environment Variables:
  - RUST_LOG (optional): Override the log filter, e.g. `debug`.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    /// Path to a TOML or JSON config file.
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(flatten)]
    display: cmd::DisplayOpts,

    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// OCR and translate a single image, then exit.
    Run(cmd::run::RunOpts),
    /// Interactive session: enter image paths one per line, and each one
    /// is OCRed and translated using models loaded once.
    Session(cmd::session::SessionOpts),
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    let config = match &opts.config {
        Some(path) => config::AppConfig::load(path).await?,
        None => config::AppConfig::default(),
    };

    match &opts.subcmd {
        Cmd::Run(run_opts) => {
            cmd::run::cmd_run(ui, &config, &opts.display, run_opts).await?;
        }
        Cmd::Session(session_opts) => {
            cmd::session::cmd_session(ui, &config, &opts.display, session_opts)
                .await?;
        }
    }
    Ok(())
}
