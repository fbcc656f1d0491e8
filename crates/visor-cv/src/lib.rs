//! Screen-vision matchers built on OpenCV.
//!
//! Three interchangeable recognition strategies share one contract: consume
//! a captured BGR frame plus an optional ROI, produce a
//! [`visor_core::RecoResult`] with raw candidates, threshold-filtered
//! candidates, and a selected best match.

pub mod color;
pub mod feature;
pub mod roi;
pub mod source;
pub mod template;
pub mod utils;

pub use color::{ColorMatcher, ColorMatcherParams, ColorSpace};
pub use feature::{FeatureDetectorKind, FeatureMatcher, FeatureMatcherParams, find_feature};
pub use source::TemplateSource;
pub use template::{MatchMethod, TemplateMatcher, TemplateMatcherParams, find_template};

pub type Result<T> = anyhow::Result<T>;

/// Rejected configuration values for matcher parameters.
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("unsupported match method code: {0}")]
    UnknownMethod(i32),
    #[error("unknown match method: {0:?}")]
    UnknownMethodName(String),
    #[error("unsupported color space code: {0}")]
    UnknownColorSpace(i32),
    #[error("unknown color space: {0:?}")]
    UnknownColorSpaceName(String),
    #[error("unknown feature detector: {0:?}")]
    UnknownDetector(String),
}
