//! Keypoint/descriptor matcher tolerant to perspective and rotation.

use super::{FeatureDetectorKind, FeatureMatcherParams};
use crate::utils::ImageUtils;
use crate::{Result, roi, source};
use opencv::{
    calib3d,
    core::{self, DMatch, KeyPoint, Mat, Point2f, Ptr, Vector},
    features2d::{
        AKAZE, BRISK, DescriptorMatcher, KAZE, KAZE_DiffusivityType, ORB, ORB_ScoreType, SIFT,
    },
    prelude::*,
};
use std::path::PathBuf;
use std::time::Instant;
use visor_core::{MatchResult, Rect, RecoResult, nms, select_index, sort_results};

/// Four corresponding points are the minimum for a planar homography.
const MIN_TEMPLATE_KEYPOINTS: usize = 4;
const RANSAC_REPROJ_THRESHOLD: f64 = 5.0;
const FILTER_NMS_IOU: f64 = 0.5;

/// Sparse keypoint matcher over one or more templates.
///
/// Scores are raw good-correspondence counts, not normalized probabilities;
/// they are comparable between feature matches but not with template-match
/// correlation scores.
pub struct FeatureMatcher {
    params: FeatureMatcherParams,
    resource_dir: Option<PathBuf>,
}

impl FeatureMatcher {
    pub fn new(params: FeatureMatcherParams) -> Self {
        Self {
            params,
            resource_dir: None,
        }
    }

    /// Resolve relative template paths against `dir`.
    pub fn with_resource_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resource_dir = Some(dir.into());
        self
    }

    /// Match every template against the ROI-cropped frame.
    pub fn analyze(&self, image: &Mat, roi_rect: Option<Rect>) -> RecoResult {
        let start = Instant::now();
        let mut result = RecoResult::new("FeatureMatch");

        let templates = source::load_templates(&self.params.templates, self.resource_dir.as_deref());
        if templates.is_empty() {
            log::warn!("feature match has no loadable templates");
            result.cost_ms = start.elapsed().as_secs_f64() * 1000.0;
            return result;
        }

        let roi_rect = roi::effective_roi(image, roi_rect);
        let search = match roi::crop(image, roi_rect) {
            Ok(search) => search,
            Err(e) => {
                log::warn!("roi crop failed: {e}");
                result.cost_ms = start.elapsed().as_secs_f64() * 1000.0;
                return result;
            }
        };

        let (kp_image, desc_image) = match self.detect(&search) {
            Ok(detected) => detected,
            Err(e) => {
                log::warn!("image feature extraction failed: {e}");
                result.cost_ms = start.elapsed().as_secs_f64() * 1000.0;
                return result;
            }
        };
        if desc_image.empty() || kp_image.len() < self.params.count {
            log::debug!(
                "target keypoints insufficient: {} found, {} required",
                kp_image.len(),
                self.params.count
            );
            result.cost_ms = start.elapsed().as_secs_f64() * 1000.0;
            return result;
        }

        let mut all_results: Vec<MatchResult> = Vec::new();
        let mut prefiltered: Vec<MatchResult> = Vec::new();

        for (i, template) in templates.iter().enumerate() {
            match self.match_one(template, &kp_image, &desc_image, roi_rect) {
                Ok(Some(candidate)) => {
                    all_results.push(candidate);
                    prefiltered.push(candidate);
                }
                Ok(None) => {}
                Err(e) => log::warn!("feature match failed for template {i}: {e}"),
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
            "feature match done: all={}, filtered={}, success={}, cost={:.1}ms",
            result.all_results.len(),
            result.filtered_results.len(),
            result.success(),
            result.cost_ms
        );
        result
    }

    /// Detect keypoints and compute descriptors, honoring the chroma mask.
    fn detect(&self, image: &Mat) -> Result<(Vector<KeyPoint>, Mat)> {
        let mask = if self.params.green_mask {
            ImageUtils::chroma_mask(image)?.unwrap_or_default()
        } else {
            Mat::default()
        };

        let mut keypoints: Vector<KeyPoint> = Vector::new();
        let mut descriptors = Mat::default();

        match self.params.detector {
            FeatureDetectorKind::Sift => {
                let mut detector = SIFT::create_def()?;
                detector.detect_and_compute(image, &mask, &mut keypoints, &mut descriptors, false)?;
            }
            FeatureDetectorKind::Orb => {
                let mut detector = ORB::create(
                    1000,
                    1.2,
                    8,
                    31,
                    0,
                    2,
                    ORB_ScoreType::HARRIS_SCORE,
                    31,
                    20,
                )?;
                detector.detect_and_compute(image, &mask, &mut keypoints, &mut descriptors, false)?;
            }
            FeatureDetectorKind::Brisk => {
                let mut detector = BRISK::create(30, 3, 1.0)?;
                detector.detect_and_compute(image, &mask, &mut keypoints, &mut descriptors, false)?;
            }
            FeatureDetectorKind::Kaze => {
                let mut detector =
                    KAZE::create(false, false, 0.001, 4, 4, KAZE_DiffusivityType::DIFF_PM_G2)?;
                detector.detect_and_compute(image, &mask, &mut keypoints, &mut descriptors, false)?;
            }
            FeatureDetectorKind::Akaze => {
                let mut detector = AKAZE::create_def()?;
                detector.detect_and_compute(image, &mask, &mut keypoints, &mut descriptors, false)?;
            }
        }

        Ok((keypoints, descriptors))
    }

    fn create_matcher(&self) -> Result<Ptr<DescriptorMatcher>> {
        let kind = if self.params.detector.uses_float_descriptors() {
            "FlannBased"
        } else {
            "BruteForce-Hamming"
        };
        Ok(DescriptorMatcher::create(kind)?)
    }

    /// One template: extract, correspond, verify geometry.
    fn match_one(
        &self,
        template: &Mat,
        kp_image: &Vector<KeyPoint>,
        desc_image: &Mat,
        roi_rect: Rect,
    ) -> Result<Option<MatchResult>> {
        let (kp_template, desc_template) = self.detect(template)?;
        if desc_template.empty() || kp_template.len() < MIN_TEMPLATE_KEYPOINTS {
            log::debug!(
                "template skipped: {} keypoints, {} required",
                kp_template.len(),
                MIN_TEMPLATE_KEYPOINTS
            );
            return Ok(None);
        }

        let mut matcher = self.create_matcher()?;
        let mut knn_matches: Vector<Vector<DMatch>> = Vector::new();
        matcher.knn_train_match(
            &desc_template,
            desc_image,
            &mut knn_matches,
            2,
            &core::no_array(),
            false,
        )?;

        let mut good: Vec<DMatch> = Vec::new();
        for pair in knn_matches.iter() {
            if pair.len() == 2 {
                let (first, second) = (pair.get(0)?, pair.get(1)?);
                if (first.distance as f64) < self.params.ratio * second.distance as f64 {
                    good.push(first);
                }
            }
        }
        log::debug!(
            "feature correspondences: {}/{} good, {} required",
            good.len(),
            knn_matches.len(),
            self.params.count
        );
        if good.len() < self.params.count {
            return Ok(None);
        }

        let mut src_points: Vector<Point2f> = Vector::new();
        let mut dst_points: Vector<Point2f> = Vector::new();
        for m in &good {
            src_points.push(kp_template.get(m.query_idx as usize)?.pt());
            dst_points.push(kp_image.get(m.train_idx as usize)?.pt());
        }

        let mut inlier_mask = Mat::default();
        let homography = calib3d::find_homography(
            &src_points,
            &dst_points,
            &mut inlier_mask,
            calib3d::RANSAC,
            RANSAC_REPROJ_THRESHOLD,
        )?;
        if homography.empty() {
            log::debug!("degenerate homography, template skipped");
            return Ok(None);
        }

        let (width, height) = (template.cols() as f32, template.rows() as f32);
        let corners: Vector<Point2f> = Vector::from_slice(&[
            Point2f::new(0.0, 0.0),
            Point2f::new(width, 0.0),
            Point2f::new(width, height),
            Point2f::new(0.0, height),
        ]);
        let mut projected: Vector<Point2f> = Vector::new();
        core::perspective_transform(&corners, &mut projected, &homography)?;

        let (mut x_min, mut y_min) = (f32::MAX, f32::MAX);
        let (mut x_max, mut y_max) = (f32::MIN, f32::MIN);
        for corner in projected.iter() {
            x_min = x_min.min(corner.x);
            y_min = y_min.min(corner.y);
            x_max = x_max.max(corner.x);
            y_max = y_max.max(corner.y);
        }

        let bbox = Rect::new(
            x_min as i32 + roi_rect.x,
            y_min as i32 + roi_rect.y,
            (x_max - x_min) as i32,
            (y_max - y_min) as i32,
        );
        Ok(Some(MatchResult::new(bbox, good.len() as f64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TemplateSource;
    use opencv::core::{CV_8UC3, Scalar};
    use opencv::imgproc;

    /// Deterministic speckle texture rich in corners.
    fn speckle_image(rows: i32, cols: i32) -> Mat {
        let mut image =
            Mat::new_rows_cols_with_default(rows, cols, CV_8UC3, Scalar::all(32.0)).unwrap();
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..240 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let x = ((state >> 33) % (cols as u64 - 12)) as i32;
            let y = ((state >> 13) % (rows as u64 - 12)) as i32;
            let shade = 96.0 + ((state >> 5) % 160) as f64;
            imgproc::rectangle(
                &mut image,
                opencv::core::Rect::new(x, y, 3 + (state % 7) as i32, 3 + ((state >> 3) % 7) as i32),
                Scalar::new(shade, 255.0 - shade, shade / 2.0, 0.0),
                -1,
                imgproc::LINE_8,
                0,
            )
            .unwrap();
        }
        image
    }

    #[test]
    fn test_featureless_template_is_skipped() {
        let image = speckle_image(200, 200);
        let flat = Mat::new_rows_cols_with_default(40, 40, CV_8UC3, Scalar::all(128.0)).unwrap();

        let params = FeatureMatcherParams {
            templates: vec![TemplateSource::Image(flat)],
            detector: FeatureDetectorKind::Orb,
            count: 4,
            ..Default::default()
        };
        let result = FeatureMatcher::new(params).analyze(&image, None);

        assert!(!result.success());
        assert!(result.all_results.is_empty());
    }

    #[test]
    fn test_featureless_target_is_a_miss_not_an_error() {
        let image = Mat::new_rows_cols_with_default(200, 200, CV_8UC3, Scalar::all(128.0)).unwrap();
        let template = speckle_image(60, 60);

        let params = FeatureMatcherParams {
            templates: vec![TemplateSource::Image(template)],
            detector: FeatureDetectorKind::Orb,
            count: 4,
            ..Default::default()
        };
        let result = FeatureMatcher::new(params).analyze(&image, None);
        assert!(!result.success());
    }

    #[test]
    fn test_exact_crop_recovered() {
        let image = speckle_image(240, 320);
        let crop = Mat::roi(&image, opencv::core::Rect::new(60, 40, 120, 100))
            .unwrap()
            .try_clone()
            .unwrap();

        let params = FeatureMatcherParams {
            templates: vec![TemplateSource::Image(crop)],
            detector: FeatureDetectorKind::Orb,
            count: 4,
            ..Default::default()
        };
        let result = FeatureMatcher::new(params).analyze(&image, None);

        assert!(result.success());
        let bbox = result.bbox().unwrap();
        // The projected box must land on the crop region.
        let expected = Rect::new(60, 40, 120, 100);
        assert!(bbox.iou(&expected) > 0.5, "bbox {bbox:?} far from {expected:?}");
        // Score is the correspondence count, well above the minimum.
        assert!(result.score() >= 4.0);
    }
}
