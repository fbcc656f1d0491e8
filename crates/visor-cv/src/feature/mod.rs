//! Feature-point matching module

pub mod matcher;

pub use matcher::FeatureMatcher;

use crate::{ParamError, source::TemplateSource};
use opencv::core::Mat;
use serde::{Deserialize, Serialize, de};
use visor_core::{OrderBy, Rect, RecoResult};

/// Keypoint detector kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum FeatureDetectorKind {
    /// Scale-invariant feature transform. Accurate, slow, float descriptors.
    Sift,
    /// Oriented FAST + rotated BRIEF. Fast, binary descriptors.
    Orb,
    /// Binary robust invariant scalable keypoints.
    Brisk,
    /// Nonlinear scale-space features, float descriptors.
    Kaze,
    /// Accelerated KAZE (default).
    #[default]
    Akaze,
}

impl FeatureDetectorKind {
    pub fn from_name(name: &str) -> Result<Self, ParamError> {
        match name.to_ascii_uppercase().as_str() {
            "SIFT" => Ok(Self::Sift),
            "ORB" => Ok(Self::Orb),
            "BRISK" => Ok(Self::Brisk),
            "KAZE" => Ok(Self::Kaze),
            "AKAZE" => Ok(Self::Akaze),
            other => Err(ParamError::UnknownDetector(other.to_string())),
        }
    }

    /// Float descriptors pair with approximate nearest-neighbor search,
    /// binary descriptors with Hamming-distance brute force.
    pub fn uses_float_descriptors(self) -> bool {
        matches!(self, Self::Sift | Self::Kaze)
    }
}

impl<'de> Deserialize<'de> for FeatureDetectorKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Self::from_name(&name).map_err(de::Error::custom)
    }
}

/// Feature matcher parameters.
#[derive(Debug, Clone)]
pub struct FeatureMatcherParams {
    pub templates: Vec<TemplateSource>,
    pub detector: FeatureDetectorKind,
    /// Lowe's ratio-test bound: keep a correspondence only when the nearest
    /// neighbor is this much closer than the second nearest.
    pub ratio: f64,
    /// Minimum good correspondences per template, and minimum keypoints
    /// required of the target image.
    pub count: usize,
    pub green_mask: bool,
    pub order_by: OrderBy,
    pub result_index: i64,
}

impl Default for FeatureMatcherParams {
    fn default() -> Self {
        Self {
            templates: Vec::new(),
            detector: FeatureDetectorKind::default(),
            ratio: 0.75,
            count: 10,
            green_mask: false,
            order_by: OrderBy::default(),
            result_index: 0,
        }
    }
}

/// Find a single template via feature matching.
pub fn find_feature(
    image: &Mat,
    template: impl Into<TemplateSource>,
    detector: FeatureDetectorKind,
    count: usize,
    ratio: f64,
    roi: Option<Rect>,
) -> RecoResult {
    let params = FeatureMatcherParams {
        templates: vec![template.into()],
        detector,
        count,
        ratio,
        ..Default::default()
    };
    FeatureMatcher::new(params).analyze(image, roi)
}
