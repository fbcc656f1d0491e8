//! Core value types for screen recognition.
//!
//! Pure data shared by the matchers and the pipeline engine: geometry,
//! match results, and the ordering/selection helpers that operate on them.
//! Nothing in this crate touches OpenCV.

pub mod geometry;
pub mod results;

pub use geometry::{Point, Rect};
pub use results::{MatchResult, OrderBy, RecoResult, nms, passes_threshold, select_index, sort_results};
