//! JSON-configured screen automation.
//!
//! A pipeline is a named-node graph: each node recognizes an on-screen
//! target with one of the visor-cv matchers, then drives simulated input
//! through a caller-supplied injector and advances along its transition or
//! fallback edges.

pub mod capture;
pub mod input;
pub mod pipeline;

pub use capture::{ImageFileCapture, ScreenCapture};
pub use input::{InputInjector, LoggingInjector};
pub use pipeline::{Pipeline, PipelineNode, PipelineResult, StopHandle};
