//! Template matching module

pub mod matcher;

pub use matcher::TemplateMatcher;

use crate::{ParamError, source::TemplateSource};
use opencv::core::Mat;
use serde::{Deserialize, Serialize, de};
use visor_core::{OrderBy, Rect, RecoResult};

/// Correlation method for template matching.
///
/// Accepts either the symbolic name or the original numeric method code
/// (0, 1, 3, 5) in configuration documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum MatchMethod {
    /// Raw squared difference (lower is better).
    SqDiff,
    /// Normalized squared difference (lower is better).
    SqDiffNormed,
    /// Normalized cross-correlation.
    CCorrNormed,
    /// Normalized correlation coefficient (default, robust to linear
    /// lighting changes).
    #[default]
    CCoeffNormed,
}

impl MatchMethod {
    pub fn from_code(code: i32) -> Result<Self, ParamError> {
        match code {
            0 => Ok(Self::SqDiff),
            1 => Ok(Self::SqDiffNormed),
            3 => Ok(Self::CCorrNormed),
            5 => Ok(Self::CCoeffNormed),
            other => Err(ParamError::UnknownMethod(other)),
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ParamError> {
        match name {
            "SqDiff" => Ok(Self::SqDiff),
            "SqDiffNormed" => Ok(Self::SqDiffNormed),
            "CCorrNormed" => Ok(Self::CCorrNormed),
            "CCoeffNormed" => Ok(Self::CCoeffNormed),
            other => Err(ParamError::UnknownMethodName(other.to_string())),
        }
    }

    pub fn to_opencv(self) -> i32 {
        use opencv::imgproc::*;
        match self {
            Self::SqDiff => TM_SQDIFF,
            Self::SqDiffNormed => TM_SQDIFF_NORMED,
            Self::CCorrNormed => TM_CCORR_NORMED,
            Self::CCoeffNormed => TM_CCOEFF_NORMED,
        }
    }

    /// Distance-style methods where a lower score is the better match.
    /// Every score comparison and threshold check branches on this.
    pub fn low_score_better(self) -> bool {
        matches!(self, Self::SqDiff | Self::SqDiffNormed)
    }
}

impl<'de> Deserialize<'de> for MatchMethod {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Code(i32),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Code(code) => Self::from_code(code).map_err(de::Error::custom),
            Repr::Name(name) => Self::from_name(&name).map_err(de::Error::custom),
        }
    }
}

/// Template matcher parameters.
#[derive(Debug, Clone)]
pub struct TemplateMatcherParams {
    /// Template images, from disk or in memory.
    pub templates: Vec<TemplateSource>,
    /// Acceptance threshold per template; the last value repeats when
    /// there are more templates than thresholds.
    pub thresholds: Vec<f64>,
    pub method: MatchMethod,
    /// Exclude the pure-green chroma key from matching.
    pub green_mask: bool,
    pub order_by: OrderBy,
    /// Which filtered result becomes the best match; negative counts from
    /// the end.
    pub result_index: i64,
    /// Search the template across `scale_range` instead of scale 1.0 only.
    pub multi_scale: bool,
    /// Inclusive `[min, max]` scale bounds.
    pub scale_range: [f64; 2],
    pub scale_step: f64,
    /// Render the filtered boxes into `RecoResult::debug_image`.
    pub debug_draw: bool,
}

impl Default for TemplateMatcherParams {
    fn default() -> Self {
        Self {
            templates: Vec::new(),
            thresholds: vec![0.7],
            method: MatchMethod::default(),
            green_mask: false,
            order_by: OrderBy::default(),
            result_index: 0,
            multi_scale: true,
            scale_range: [0.5, 1.5],
            scale_step: 0.1,
            debug_draw: false,
        }
    }
}

/// Find a single template in `image` with default multi-scale search.
pub fn find_template(
    image: &Mat,
    template: impl Into<TemplateSource>,
    threshold: f64,
    roi: Option<Rect>,
    method: MatchMethod,
) -> RecoResult {
    let params = TemplateMatcherParams {
        templates: vec![template.into()],
        thresholds: vec![threshold],
        method,
        ..Default::default()
    };
    TemplateMatcher::new(params).analyze(image, roi)
}
