//! Input-injection collaborator.

use anyhow::Result;
use std::time::Duration;

/// Simulated-input primitives the pipeline drives.
///
/// The engine computes coordinates and timing; all OS interaction happens
/// behind this trait.
pub trait InputInjector {
    fn click(&mut self, x: i32, y: i32) -> Result<()>;
    fn mouse_down(&mut self, x: i32, y: i32) -> Result<()>;
    fn mouse_up(&mut self) -> Result<()>;
    fn move_to(&mut self, x: i32, y: i32) -> Result<()>;
    fn drag(&mut self, dx: i32, dy: i32, duration: Duration) -> Result<()>;
    fn type_text(&mut self, text: &str) -> Result<()>;
}

/// Logs every primitive instead of touching the OS.
#[derive(Debug, Default)]
pub struct LoggingInjector;

impl InputInjector for LoggingInjector {
    fn click(&mut self, x: i32, y: i32) -> Result<()> {
        log::info!("click: ({x}, {y})");
        Ok(())
    }

    fn mouse_down(&mut self, x: i32, y: i32) -> Result<()> {
        log::info!("mouse down: ({x}, {y})");
        Ok(())
    }

    fn mouse_up(&mut self) -> Result<()> {
        log::info!("mouse up");
        Ok(())
    }

    fn move_to(&mut self, x: i32, y: i32) -> Result<()> {
        log::info!("move to: ({x}, {y})");
        Ok(())
    }

    fn drag(&mut self, dx: i32, dy: i32, duration: Duration) -> Result<()> {
        log::info!("drag: ({dx}, {dy}) over {}ms", duration.as_millis());
        Ok(())
    }

    fn type_text(&mut self, text: &str) -> Result<()> {
        log::info!("type: {text}");
        Ok(())
    }
}
