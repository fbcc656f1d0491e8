//! Per-run diagnostic frame capture.
//!
//! Frames are routed through an injected sink so concurrent pipelines can
//! write to separate places; write failures are the caller's to log, never
//! to propagate into control flow.

use anyhow::{Context, Result};
use opencv::core::{Mat, Vector};
use std::fs;
use std::path::PathBuf;

/// Receives one annotated frame per node visit.
pub trait DiagnosticsSink {
    /// Called once when a run starts, before any frame is written.
    fn begin_run(&mut self) -> Result<()> {
        Ok(())
    }

    /// Persist the frame for the node at `index` (1-based, insertion
    /// order); `success` distinguishes failure frames.
    fn save_frame(&mut self, index: usize, node: &str, success: bool, frame: &Mat) -> Result<()>;
}

/// Discards every frame.
#[derive(Debug, Default)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn save_frame(&mut self, _index: usize, _node: &str, _success: bool, _frame: &Mat) -> Result<()> {
        Ok(())
    }
}

/// Writes `node_<idx>.png` (or `node_<idx>_fail.png`) into a directory
/// that is cleared at the start of every run.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DiagnosticsSink for DirectorySink {
    fn begin_run(&mut self) -> Result<()> {
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)
                .with_context(|| format!("failed to read {}", self.dir.display()))?
            {
                let path = entry?.path();
                if path.is_file() {
                    let _ = fs::remove_file(path);
                }
            }
        } else {
            fs::create_dir_all(&self.dir)
                .with_context(|| format!("failed to create {}", self.dir.display()))?;
        }
        Ok(())
    }

    fn save_frame(&mut self, index: usize, _node: &str, success: bool, frame: &Mat) -> Result<()> {
        let file = if success {
            format!("node_{index}.png")
        } else {
            format!("node_{index}_fail.png")
        };
        let path = self.dir.join(file);
        opencv::imgcodecs::imwrite(&path.to_string_lossy(), frame, &Vector::new())
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}
