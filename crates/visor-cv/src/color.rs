//! Color-range segmentation matcher.

use crate::{ParamError, roi};
use anyhow::Result;
use opencv::{
    core::{self, Mat, Scalar, Vector},
    imgproc,
    prelude::*,
};
use serde::{Deserialize, Serialize, de};
use std::time::Instant;
use visor_core::{MatchResult, OrderBy, Rect, RecoResult, nms, select_index, sort_results};

const FILTER_NMS_IOU: f64 = 0.5;

/// Color space the bounds are expressed in.
///
/// Accepts either the symbolic name or the original OpenCV conversion code
/// (4 = RGB, 40 = HSV, 6 = Gray) in configuration documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ColorSpace {
    /// Native frame order, no conversion.
    Bgr,
    #[default]
    Rgb,
    Hsv,
    Gray,
}

impl ColorSpace {
    pub fn from_code(code: i32) -> Result<Self, ParamError> {
        match code {
            4 => Ok(Self::Rgb),
            40 => Ok(Self::Hsv),
            6 => Ok(Self::Gray),
            other => Err(ParamError::UnknownColorSpace(other)),
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ParamError> {
        match name.to_ascii_uppercase().as_str() {
            "BGR" => Ok(Self::Bgr),
            "RGB" => Ok(Self::Rgb),
            "HSV" => Ok(Self::Hsv),
            "GRAY" => Ok(Self::Gray),
            other => Err(ParamError::UnknownColorSpaceName(other.to_string())),
        }
    }

    fn conversion(self) -> Option<i32> {
        match self {
            Self::Bgr => None,
            Self::Rgb => Some(imgproc::COLOR_BGR2RGB),
            Self::Hsv => Some(imgproc::COLOR_BGR2HSV),
            Self::Gray => Some(imgproc::COLOR_BGR2GRAY),
        }
    }
}

impl<'de> Deserialize<'de> for ColorSpace {
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

/// One inclusive lower/upper bound pair in the selected color space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorRange {
    pub lower: Vec<i32>,
    pub upper: Vec<i32>,
}

impl ColorRange {
    pub fn new(lower: Vec<i32>, upper: Vec<i32>) -> Self {
        Self { lower, upper }
    }

    fn scalar(values: &[i32]) -> Scalar {
        let component = |i: usize| values.get(i).copied().unwrap_or(0) as f64;
        Scalar::new(component(0), component(1), component(2), component(3))
    }
}

/// Color matcher parameters.
#[derive(Debug, Clone)]
pub struct ColorMatcherParams {
    /// Ranges are OR-combined: a pixel qualifying under any range counts.
    pub ranges: Vec<ColorRange>,
    pub color_space: ColorSpace,
    /// Minimum qualifying pixels before a region is accepted.
    pub count: usize,
    /// Split matches into 8-connected components instead of one bounding
    /// region per range.
    pub connected: bool,
    pub order_by: OrderBy,
    pub result_index: i64,
}

impl Default for ColorMatcherParams {
    fn default() -> Self {
        Self {
            ranges: Vec::new(),
            color_space: ColorSpace::default(),
            count: 1,
            connected: false,
            order_by: OrderBy::default(),
            result_index: 0,
        }
    }
}

/// Locates the bounding region(s) of pixels inside configured color ranges.
pub struct ColorMatcher {
    params: ColorMatcherParams,
}

impl ColorMatcher {
    pub fn new(params: ColorMatcherParams) -> Self {
        Self { params }
    }

    /// Match every range against the ROI-cropped frame.
    pub fn analyze(&self, image: &Mat, roi_rect: Option<Rect>) -> RecoResult {
        let start = Instant::now();
        let mut result = RecoResult::new("ColorMatch");

        if self.params.ranges.is_empty() {
            log::warn!("color match has no ranges configured");
            result.cost_ms = start.elapsed().as_secs_f64() * 1000.0;
            return result;
        }

        let roi_rect = roi::effective_roi(image, roi_rect);
        let converted = match self.converted_roi(image, roi_rect) {
            Ok(converted) => converted,
            Err(e) => {
                log::warn!("color conversion failed: {e}");
                result.cost_ms = start.elapsed().as_secs_f64() * 1000.0;
                return result;
            }
        };

        let mut all_results: Vec<MatchResult> = Vec::new();
        let mut prefiltered: Vec<MatchResult> = Vec::new();

        for (i, range) in self.params.ranges.iter().enumerate() {
            let candidates = match self.match_range(&converted, range, roi_rect) {
                Ok(candidates) => candidates,
                Err(e) => {
                    log::warn!("color range {i} failed: {e}");
                    continue;
                }
            };
            for candidate in candidates {
                // Gate on the minimum qualifying pixel count.
                if candidate.score >= self.params.count as f64 {
                    prefiltered.push(candidate);
                }
                all_results.push(candidate);
            }
        }

        let mut filtered = nms(prefiltered, FILTER_NMS_IOU, false);
        sort_results(&mut all_results, self.params.order_by, false);
        sort_results(&mut filtered, self.params.order_by, false);

        result.best_result =
            select_index(filtered.len(), self.params.result_index).map(|idx| filtered[idx]);
        result.all_results = all_results;
        result.filtered_results = filtered;
        result.cost_ms = start.elapsed().as_secs_f64() * 1000.0;

        log::debug!(
            "color match done: all={}, filtered={}, success={}, cost={:.1}ms",
            result.all_results.len(),
            result.filtered_results.len(),
            result.success(),
            result.cost_ms
        );
        result
    }

    fn converted_roi(&self, image: &Mat, roi_rect: Rect) -> Result<Mat> {
        let search = roi::crop(image, roi_rect)?;
        match self.params.color_space.conversion() {
            None => Ok(search),
            Some(code) => {
                let mut converted = Mat::default();
                imgproc::cvt_color_def(&search, &mut converted, code)?;
                Ok(converted)
            }
        }
    }

    /// Candidate regions for one range; score is the qualifying pixel count.
    fn match_range(&self, search: &Mat, range: &ColorRange, roi_rect: Rect) -> Result<Vec<MatchResult>> {
        let mut mask = Mat::default();
        core::in_range(
            search,
            &ColorRange::scalar(&range.lower),
            &ColorRange::scalar(&range.upper),
            &mut mask,
        )?;

        if self.params.connected {
            let mut labels = Mat::default();
            let mut stats = Mat::default();
            let mut centroids = Mat::default();
            let components = imgproc::connected_components_with_stats(
                &mask,
                &mut labels,
                &mut stats,
                &mut centroids,
                8,
                core::CV_32S,
            )?;

            let mut candidates = Vec::new();
            for label in 1..components {
                let x = *stats.at_2d::<i32>(label, imgproc::CC_STAT_LEFT)?;
                let y = *stats.at_2d::<i32>(label, imgproc::CC_STAT_TOP)?;
                let width = *stats.at_2d::<i32>(label, imgproc::CC_STAT_WIDTH)?;
                let height = *stats.at_2d::<i32>(label, imgproc::CC_STAT_HEIGHT)?;
                let area = *stats.at_2d::<i32>(label, imgproc::CC_STAT_AREA)?;
                candidates.push(MatchResult::new(
                    Rect::new(x + roi_rect.x, y + roi_rect.y, width, height),
                    area as f64,
                ));
            }
            Ok(candidates)
        } else {
            let pixels = core::count_non_zero(&mask)?;
            if pixels == 0 {
                return Ok(Vec::new());
            }
            let mut points: Vector<core::Point> = Vector::new();
            core::find_non_zero(&mask, &mut points)?;
            let bounds = imgproc::bounding_rect(&points)?;
            Ok(vec![MatchResult::new(
                Rect::new(
                    bounds.x + roi_rect.x,
                    bounds.y + roi_rect.y,
                    bounds.width,
                    bounds.height,
                ),
                pixels as f64,
            )])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::CV_8UC3;

    fn frame_with_blobs(blobs: &[(core::Rect, Scalar)]) -> Mat {
        let mut image =
            Mat::new_rows_cols_with_default(120, 160, CV_8UC3, Scalar::all(0.0)).unwrap();
        for (rect, color) in blobs {
            imgproc::rectangle(&mut image, *rect, *color, -1, imgproc::LINE_8, 0).unwrap();
        }
        image
    }

    fn red_range() -> ColorRange {
        // BGR bounds for a saturated red.
        ColorRange::new(vec![0, 0, 200], vec![60, 60, 255])
    }

    fn blue_range() -> ColorRange {
        ColorRange::new(vec![200, 0, 0], vec![255, 60, 60])
    }

    #[test]
    fn test_single_blob_located() {
        let image = frame_with_blobs(&[(
            core::Rect::new(30, 40, 20, 10),
            Scalar::new(0.0, 0.0, 230.0, 0.0),
        )]);

        let params = ColorMatcherParams {
            ranges: vec![red_range()],
            color_space: ColorSpace::Bgr,
            count: 50,
            ..Default::default()
        };
        let result = ColorMatcher::new(params).analyze(&image, None);

        assert!(result.success());
        assert_eq!(result.bbox(), Some(Rect::new(30, 40, 20, 10)));
        assert_eq!(result.score(), 200.0);
    }

    #[test]
    fn test_minimum_pixel_count_gates_acceptance() {
        let image = frame_with_blobs(&[(
            core::Rect::new(10, 10, 4, 4),
            Scalar::new(0.0, 0.0, 230.0, 0.0),
        )]);

        let params = ColorMatcherParams {
            ranges: vec![red_range()],
            color_space: ColorSpace::Bgr,
            count: 100,
            ..Default::default()
        };
        let result = ColorMatcher::new(params).analyze(&image, None);

        // The blob is reported but too small to accept.
        assert!(!result.success());
        assert_eq!(result.all_results.len(), 1);
        assert!(result.filtered_results.is_empty());
    }

    #[test]
    fn test_multiple_ranges_or_combined() {
        let image = frame_with_blobs(&[
            (core::Rect::new(10, 10, 12, 12), Scalar::new(0.0, 0.0, 230.0, 0.0)),
            (core::Rect::new(100, 60, 12, 12), Scalar::new(230.0, 0.0, 0.0, 0.0)),
        ]);

        let params = ColorMatcherParams {
            ranges: vec![red_range(), blue_range()],
            color_space: ColorSpace::Bgr,
            count: 50,
            ..Default::default()
        };
        let result = ColorMatcher::new(params).analyze(&image, None);

        assert_eq!(result.filtered_results.len(), 2);
        assert!(result.success());
    }

    #[test]
    fn test_connected_components_split_blobs() {
        let image = frame_with_blobs(&[
            (core::Rect::new(10, 10, 12, 12), Scalar::new(0.0, 0.0, 230.0, 0.0)),
            (core::Rect::new(100, 60, 6, 6), Scalar::new(0.0, 0.0, 230.0, 0.0)),
        ]);

        let mut params = ColorMatcherParams {
            ranges: vec![red_range()],
            color_space: ColorSpace::Bgr,
            count: 1,
            connected: true,
            ..Default::default()
        };
        let result = ColorMatcher::new(params.clone()).analyze(&image, None);
        assert_eq!(result.filtered_results.len(), 2);

        // Raising the floor drops the small component.
        params.count = 100;
        let result = ColorMatcher::new(params).analyze(&image, None);
        assert_eq!(result.filtered_results.len(), 1);
        assert_eq!(result.bbox(), Some(Rect::new(10, 10, 12, 12)));
    }

    #[test]
    fn test_roi_restricts_search() {
        let image = frame_with_blobs(&[(
            core::Rect::new(100, 60, 12, 12),
            Scalar::new(0.0, 0.0, 230.0, 0.0),
        )]);

        let params = ColorMatcherParams {
            ranges: vec![red_range()],
            color_space: ColorSpace::Bgr,
            count: 10,
            ..Default::default()
        };
        let matcher = ColorMatcher::new(params);

        let inside = matcher.analyze(&image, Some(Rect::new(90, 50, 40, 40)));
        assert_eq!(inside.bbox(), Some(Rect::new(100, 60, 12, 12)));

        let outside = matcher.analyze(&image, Some(Rect::new(0, 0, 50, 50)));
        assert!(!outside.success());
    }
}
