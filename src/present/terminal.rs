//! Human-readable output for a terminal.

use std::{
    fmt,
    io::{self, IsTerminal as _, Write},
};

use crossterm::style::{Color, Stylize as _};
use image::DynamicImage;

use super::Presenter;
use crate::{
    pipeline::PipelineError, prelude::*, translate::TranslationError,
    upload::UploadedImage,
};

/// Writes each stage as a titled section.
pub struct TerminalPresenter<W> {
    out: W,
    color: bool,
    preview: bool,
}

impl TerminalPresenter<io::Stdout> {
    /// Write to standard output. Color and image previews are only used when
    /// standard output is a terminal.
    pub fn stdout(preview: bool) -> Self {
        let stdout = io::stdout();
        let is_tty = stdout.is_terminal();
        let color = is_tty && std::env::var_os("NO_COLOR").is_none();
        Self::new(stdout, color, preview && is_tty)
    }
}

impl<W: Write + Send> TerminalPresenter<W> {
    pub fn new(out: W, color: bool, preview: bool) -> Self {
        Self {
            out,
            color,
            preview,
        }
    }

    /// Get our output back.
    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, args: fmt::Arguments<'_>) {
        if let Err(err) = self.out.write_fmt(args) {
            warn!("Cannot write output: {err}");
        }
    }

    fn heading(&mut self, title: &str) {
        if self.color {
            self.emit(format_args!("\n{}\n", title.bold()));
        } else {
            self.emit(format_args!("\n{title}\n"));
        }
    }

    fn status(&mut self, symbol: &str, msg: &str, color: Color) {
        if self.color {
            self.emit(format_args!("{}\n", format!("{symbol} {msg}").with(color)));
        } else {
            self.emit(format_args!("{symbol} {msg}\n"));
        }
    }

    fn draw_preview(&mut self, image: &DynamicImage) {
        // viuer writes straight to stdout, so anything we buffered goes first.
        if let Err(err) = self.out.flush() {
            warn!("Cannot write output: {err}");
        }
        let width = crossterm::terminal::size()
            .ok()
            .map(|(cols, _rows)| u32::from(cols));
        let config = viuer::Config {
            absolute_offset: false,
            width,
            ..viuer::Config::default()
        };
        if let Err(err) = viuer::print(image, &config) {
            warn!("Cannot preview image: {err}");
        }
    }
}

impl<W: Write + Send> Presenter for TerminalPresenter<W> {
    fn image(&mut self, upload: &UploadedImage) {
        self.heading("🖼  Uploaded Image");
        self.emit(format_args!(
            "{} ({}, {}×{})\n",
            upload.name,
            upload.mime_type,
            upload.image.width(),
            upload.image.height(),
        ));
        if self.preview {
            self.draw_preview(&upload.image);
        }
    }

    fn ocr_text(&mut self, raw_text: &str) {
        self.heading("🔍 OCR Result");
        self.emit(format_args!("```\n{raw_text}\n```\n"));
    }

    fn translation(&mut self, outcome: &Result<String, TranslationError>) {
        self.heading("🌐 Translated Text (Nepali → English)");
        match outcome {
            Ok(text) => self.status("✅", text, Color::Green),
            Err(err) => self.status("❌", err.user_message(), Color::Red),
        }
    }

    fn failure(&mut self, err: &PipelineError) {
        self.status("❌", &err.user_message(), Color::Red);
    }

    fn finish(&mut self) {
        if let Err(err) = self.out.flush() {
            warn!("Cannot write output: {err}");
        }
    }
}
