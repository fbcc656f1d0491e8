//! Node-graph execution engine.
//!
//! Traversal per node: recognize (with retry inside the node's timeout
//! window), invert if configured, then either act and advance along the
//! first transition edge, or fall back to the first enabled `next` node.
//! A run halts when no further node is reachable or a stop is requested.

pub mod action;
pub mod diagnostics;
pub mod node;

pub use action::{Action, Target};
pub use diagnostics::{DiagnosticsSink, DirectorySink, NullSink};
pub use node::{PipelineNode, Recognition};

use crate::capture::ScreenCapture;
use crate::input::InputInjector;
use anyhow::{Context, Result};
use node::RawNode;
use opencv::{core::Mat, prelude::*};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use visor_core::{MatchResult, Rect, RecoResult};
use visor_cv::{ColorMatcher, FeatureMatcher, TemplateMatcher};

/// Errors the engine itself raises. Matcher-internal failures are logged
/// and absorbed instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("entry node not found: {0}")]
    UnknownEntry(String),
    #[error("unknown recognition kind: {0:?}")]
    UnknownRecognition(String),
    #[error("unknown action kind: {0:?}")]
    UnknownAction(String),
    #[error("pipeline config must be a JSON object")]
    NotAnObject,
}

/// Cooperative stop flag, cloneable into other threads.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Request termination at the next node boundary.
    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Outcome of one `run` call, built fresh each time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    pub entry: String,
    pub executed_nodes: Vec<String>,
    pub last_node: String,
    pub last_reco_result: Option<RecoResult>,
    pub error: Option<String>,
    pub cost_ms: f64,
    pub logs: Vec<String>,
}

impl PipelineResult {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize pipeline result")
    }
}

/// One automation session: an immutable node graph plus the capture and
/// input collaborators supplied by the caller.
///
/// `run` occupies its calling thread for the whole traversal, including
/// delays and action durations; serializing concurrent runs against the
/// same target is the caller's responsibility.
pub struct Pipeline {
    nodes: HashMap<String, PipelineNode>,
    node_order: Vec<String>,
    capture: Box<dyn ScreenCapture>,
    input: Box<dyn InputInjector>,
    resource_dir: Option<PathBuf>,
    running: Arc<AtomicBool>,
    logs: Vec<String>,
    sink: Box<dyn DiagnosticsSink>,
}

impl Pipeline {
    pub fn new(capture: Box<dyn ScreenCapture>, input: Box<dyn InputInjector>) -> Self {
        Self {
            nodes: HashMap::new(),
            node_order: Vec::new(),
            capture,
            input,
            resource_dir: None,
            running: Arc::new(AtomicBool::new(false)),
            logs: Vec::new(),
            sink: Box::new(NullSink),
        }
    }

    /// Directory relative template paths resolve against.
    pub fn with_resource_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resource_dir = Some(dir.into());
        self
    }

    /// Sink used by [`Pipeline::run`]; defaults to discarding frames.
    pub fn with_diagnostics(mut self, sink: Box<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Load the node graph from a parsed configuration document.
    ///
    /// Keys starting with `$` are metadata, not nodes; a `$resource_dir`
    /// string hint overrides the resource directory.
    pub fn load_from_value(&mut self, config: &serde_json::Value) -> Result<()> {
        let map = config.as_object().ok_or(PipelineError::NotAnObject)?;

        self.nodes.clear();
        self.node_order.clear();
        for (name, value) in map {
            if let Some(meta) = name.strip_prefix('$') {
                if meta == "resource_dir" {
                    if let Some(dir) = value.as_str() {
                        self.resource_dir = Some(PathBuf::from(dir));
                    }
                }
                continue;
            }

            let raw: RawNode = serde_json::from_value(value.clone())
                .with_context(|| format!("node {name:?}"))?;
            let node =
                PipelineNode::from_raw(name, raw).with_context(|| format!("node {name:?}"))?;
            self.node_order.push(name.clone());
            self.nodes.insert(name.clone(), node);
        }
        Ok(())
    }

    /// Load the node graph from a JSON document on disk.
    pub fn load_from_json_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("pipeline config not found: {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("invalid pipeline config: {}", path.display()))?;
        self.load_from_value(&config)
    }

    /// Node names in document order.
    pub fn node_names(&self) -> Vec<&str> {
        self.node_order.iter().map(String::as_str).collect()
    }

    pub fn node(&self, name: &str) -> Option<&PipelineNode> {
        self.nodes.get(name)
    }

    /// Handle for requesting a stop from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.running.clone())
    }

    /// Request cooperative termination; observed at the next node or retry
    /// boundary, never mid-recognition or mid-action.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Run the graph from `entry` using the configured diagnostics sink.
    pub fn run(&mut self, entry: &str) -> PipelineResult {
        let mut sink = std::mem::replace(&mut self.sink, Box::new(NullSink));
        let result = self.run_with_sink(entry, sink.as_mut());
        self.sink = sink;
        result
    }

    /// Run the graph from `entry`, writing diagnostic frames to `sink`.
    pub fn run_with_sink(&mut self, entry: &str, sink: &mut dyn DiagnosticsSink) -> PipelineResult {
        let start = Instant::now();
        self.running.store(true, Ordering::SeqCst);
        self.logs.clear();

        let mut result = PipelineResult {
            entry: entry.to_string(),
            ..Default::default()
        };

        if !self.nodes.contains_key(entry) {
            result.error = Some(PipelineError::UnknownEntry(entry.to_string()).to_string());
            result.cost_ms = start.elapsed().as_secs_f64() * 1000.0;
            self.running.store(false, Ordering::SeqCst);
            return result;
        }

        if let Err(e) = sink.begin_run() {
            self.log(format!("diagnostics setup failed: {e}"));
        }

        if let Err(e) = self.traverse(entry, sink, &mut result) {
            self.log(format!("run aborted: {e:#}"));
            result.error = Some(format!("{e:#}"));
        }

        result.success = !result.executed_nodes.is_empty();
        result.cost_ms = start.elapsed().as_secs_f64() * 1000.0;
        result.logs = self.logs.clone();
        self.running.store(false, Ordering::SeqCst);
        result
    }

    fn traverse(
        &mut self,
        entry: &str,
        sink: &mut dyn DiagnosticsSink,
        result: &mut PipelineResult,
    ) -> Result<()> {
        let mut current = entry.to_string();

        while self.running.load(Ordering::SeqCst) {
            let Some(node) = self.nodes.get(&current).cloned() else {
                self.log(format!("node {current:?} is not defined, stopping"));
                break;
            };
            if !node.enabled {
                self.log(format!("node {current:?} is disabled, stopping"));
                break;
            }
            self.log(format!("executing node: {current}"));

            let (reco, frame, success) = self.recognize_with_retry(&node)?;
            result.last_reco_result = Some(reco.clone());
            self.save_debug_frame(sink, &node, &reco, success, &frame);

            if !success {
                if let Some(fallback) = self.find_fallback(&node) {
                    self.log(format!("recognition failed, falling back to {fallback:?}"));
                    current = fallback;
                    continue;
                }
                self.log(format!("node {current} timed out with no reachable fallback"));
                break;
            }

            self.log(format!("recognition succeeded, score: {:.3}", reco.score()));
            result.executed_nodes.push(current.clone());
            result.last_node = current.clone();

            if node.pre_delay_ms > 0 {
                thread::sleep(Duration::from_millis(node.pre_delay_ms));
            }
            self.execute_action(&node, &reco)?;
            if node.post_delay_ms > 0 {
                thread::sleep(Duration::from_millis(node.post_delay_ms));
            }

            match node.next.first() {
                Some(next) => current = next.clone(),
                None => break,
            }
        }
        Ok(())
    }

    /// Recognize, retrying inside the node's timeout window with
    /// `rate_limit` pauses between attempts. The first attempt always
    /// runs; a zero timeout means exactly one attempt.
    fn recognize_with_retry(&mut self, node: &PipelineNode) -> Result<(RecoResult, Mat, bool)> {
        let deadline = Instant::now() + Duration::from_millis(node.timeout_ms);

        loop {
            let frame = self.capture.capture().context("screen capture failed")?;
            let reco = self.recognize(node, &frame);
            let success = reco.success() != node.inverse;

            let now = Instant::now();
            if success || now >= deadline || !self.running.load(Ordering::SeqCst) {
                return Ok((reco, frame, success));
            }

            let pause = Duration::from_millis(node.rate_limit_ms).min(deadline - now);
            thread::sleep(pause);
        }
    }

    fn recognize(&self, node: &PipelineNode, frame: &Mat) -> RecoResult {
        match &node.recognition {
            Recognition::DirectHit => {
                let mut result = RecoResult::new("DirectHit");
                let bbox = node
                    .roi
                    .unwrap_or_else(|| Rect::new(0, 0, frame.cols(), frame.rows()));
                result.best_result = Some(MatchResult::new(bbox, 1.0));
                result
            }
            Recognition::TemplateMatch(params) => {
                let mut matcher = TemplateMatcher::new(params.clone());
                if let Some(dir) = &self.resource_dir {
                    matcher = matcher.with_resource_dir(dir);
                }
                matcher.analyze(frame, node.roi)
            }
            Recognition::FeatureMatch(params) => {
                let mut matcher = FeatureMatcher::new(params.clone());
                if let Some(dir) = &self.resource_dir {
                    matcher = matcher.with_resource_dir(dir);
                }
                matcher.analyze(frame, node.roi)
            }
            Recognition::ColorMatch(params) => {
                ColorMatcher::new(params.clone()).analyze(frame, node.roi)
            }
        }
    }

    /// Best-effort annotated frame write; failures are logged only.
    fn save_debug_frame(
        &mut self,
        sink: &mut dyn DiagnosticsSink,
        node: &PipelineNode,
        reco: &RecoResult,
        success: bool,
        frame: &Mat,
    ) {
        let annotated = match reco.bbox() {
            Some(bbox) => visor_cv::utils::ImageUtils::draw_boxes(frame, &[bbox])
                .unwrap_or_else(|_| frame.clone()),
            None => frame.clone(),
        };

        let index = self
            .node_order
            .iter()
            .position(|name| name == &node.name)
            .map(|i| i + 1)
            .unwrap_or(0);
        if let Err(e) = sink.save_frame(index, &node.name, success, &annotated) {
            self.log(format!("debug frame save failed: {e}"));
        }
    }

    fn find_fallback(&self, node: &PipelineNode) -> Option<String> {
        node.next
            .iter()
            .find(|name| self.nodes.get(*name).is_some_and(|n| n.enabled))
            .cloned()
    }

    fn execute_action(&mut self, node: &PipelineNode, reco: &RecoResult) -> Result<()> {
        match &node.action {
            Action::DoNothing => Ok(()),
            Action::Click { target, offset } => {
                let point = target.resolve(reco, *offset);
                self.log(format!("click: ({}, {})", point.x, point.y));
                self.input.click(point.x, point.y)
            }
            Action::LongPress {
                target,
                offset,
                duration_ms,
            } => {
                let point = target.resolve(reco, *offset);
                self.log(format!(
                    "long press: ({}, {}) for {duration_ms}ms",
                    point.x, point.y
                ));
                self.input.mouse_down(point.x, point.y)?;
                thread::sleep(Duration::from_millis(*duration_ms));
                self.input.mouse_up()
            }
            Action::Swipe {
                begin,
                end,
                duration_ms,
            } => {
                let start = begin.resolve(reco, [0; 4]);
                self.log(format!(
                    "swipe: ({}, {}) -> ({}, {})",
                    start.x, start.y, end.x, end.y
                ));
                self.input.move_to(start.x, start.y)?;
                self.input.drag(
                    end.x - start.x,
                    end.y - start.y,
                    Duration::from_millis(*duration_ms),
                )
            }
            Action::InputText { text } => {
                self.log(format!("type: {text}"));
                self.input.type_text(text)
            }
            Action::Wait { duration_ms } => {
                self.log(format!("wait: {duration_ms}ms"));
                thread::sleep(Duration::from_millis(*duration_ms));
                Ok(())
            }
        }
    }

    fn log(&mut self, message: String) {
        log::info!("{message}");
        self.logs.push(message);
    }
}
