//! Command-line entry points.

use clap::{Args, ValueEnum};

use crate::present::{Presenter, json::JsonPresenter, terminal::TerminalPresenter};

pub mod run;
pub mod session;

/// How results are shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Titled sections for people.
    #[default]
    Text,
    /// One JSON object per image, one per line.
    Json,
}

/// Common output options for all subcommands.
#[derive(Debug, Clone, Args)]
pub struct DisplayOpts {
    /// Output format.
    #[clap(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Don't draw a preview of each image in the terminal.
    #[clap(long, global = true)]
    no_preview: bool,
}

impl DisplayOpts {
    /// Create a presenter writing to standard output.
    pub fn presenter(&self) -> Box<dyn Presenter> {
        match self.format {
            OutputFormat::Text => Box::new(TerminalPresenter::stdout(!self.no_preview)),
            OutputFormat::Json => Box::new(JsonPresenter::stdout()),
        }
    }
}
