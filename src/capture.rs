//! Frame capture collaborator.

use anyhow::{Context, Result, bail};
use opencv::{core::Mat, imgcodecs, prelude::*};
use std::path::PathBuf;

/// Supplies the current screen frame as a BGR image.
///
/// The pipeline re-queries once per recognition attempt and never holds a
/// frame across attempts.
pub trait ScreenCapture {
    fn capture(&mut self) -> Result<Mat>;
}

impl<F> ScreenCapture for F
where
    F: FnMut() -> Result<Mat>,
{
    fn capture(&mut self) -> Result<Mat> {
        self()
    }
}

/// Captures by re-reading a screenshot file. Intended for demos and tests.
pub struct ImageFileCapture {
    path: PathBuf,
}

impl ImageFileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScreenCapture for ImageFileCapture {
    fn capture(&mut self) -> Result<Mat> {
        let frame = imgcodecs::imread(&self.path.to_string_lossy(), imgcodecs::IMREAD_COLOR)
            .with_context(|| format!("failed to read screenshot: {}", self.path.display()))?;
        if frame.empty() {
            bail!("could not decode screenshot: {}", self.path.display());
        }
        Ok(frame)
    }
}
