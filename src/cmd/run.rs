//! The `run` subcommand.

use clap::Args;

use super::DisplayOpts;
use crate::{config::AppConfig, models::SharedModels, pipeline, prelude::*, ui::Ui};

#[derive(Debug, Args)]
pub struct RunOpts {
    /// A PNG or JPEG image, or `-` to read it from standard input.
    image: PathBuf,
}

/// The `run` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_run(
    ui: Ui,
    config: &AppConfig,
    display: &DisplayOpts,
    opts: &RunOpts,
) -> Result<()> {
    let models = SharedModels::new(ui.clone(), config);
    let mut presenter = display.presenter();
    pipeline::process_upload(&ui, &models, &opts.image, presenter.as_mut()).await?;
    Ok(())
}
