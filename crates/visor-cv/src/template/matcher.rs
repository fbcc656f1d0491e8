//! Exhaustive multi-scale template correlation matcher.

use super::TemplateMatcherParams;
use crate::utils::ImageUtils;
use crate::{Result, roi, source};
use opencv::{
    core::{self, Mat, Size},
    imgproc,
    prelude::*,
};
use std::path::PathBuf;
use std::time::Instant;
use visor_core::{MatchResult, Rect, RecoResult, nms, passes_threshold, select_index, sort_results};

/// Candidates below this raw score never enter the per-scale pool.
const PRE_FILTER_THRESHOLD: f64 = 0.5;
/// Per-scale candidate cap, bounding worst-case cost.
const MAX_CANDIDATES: usize = 50;
/// De-duplication threshold for one template's own candidates.
const TEMPLATE_NMS_IOU: f64 = 0.7;
/// De-duplication threshold for the cross-template filtered set.
const FILTER_NMS_IOU: f64 = 0.5;

/// Dense pixel-correlation matcher over one or more templates.
pub struct TemplateMatcher {
    params: TemplateMatcherParams,
    resource_dir: Option<PathBuf>,
}

impl TemplateMatcher {
    pub fn new(params: TemplateMatcherParams) -> Self {
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
        let mut result = RecoResult::new("TemplateMatch");
        let low = self.params.method.low_score_better();

        let templates = source::load_templates(&self.params.templates, self.resource_dir.as_deref());
        if templates.is_empty() {
            log::warn!("template match has no loadable templates");
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

        let mut all_results: Vec<MatchResult> = Vec::new();
        let mut prefiltered: Vec<MatchResult> = Vec::new();

        for (i, template) in templates.iter().enumerate() {
            let threshold = self.threshold_for(i);
            let matches = match self.match_one(&search, roi_rect, template) {
                Ok(matches) => matches,
                Err(e) => {
                    log::warn!("template {i} failed: {e}");
                    continue;
                }
            };

            for candidate in &matches {
                if passes_threshold(candidate.score, threshold, low) {
                    prefiltered.push(*candidate);
                }
            }
            all_results.extend(matches);
        }

        let mut filtered = nms(prefiltered, FILTER_NMS_IOU, low);
        sort_results(&mut all_results, self.params.order_by, low);
        sort_results(&mut filtered, self.params.order_by, low);

        result.best_result =
            select_index(filtered.len(), self.params.result_index).map(|idx| filtered[idx]);

        if self.params.debug_draw && !filtered.is_empty() {
            let boxes: Vec<Rect> = filtered.iter().map(|m| m.bbox).collect();
            result.debug_image = ImageUtils::draw_boxes(image, &boxes)
                .and_then(|canvas| ImageUtils::mat_to_rgb(&canvas))
                .map_err(|e| log::warn!("debug draw failed: {e}"))
                .ok();
        }

        result.all_results = all_results;
        result.filtered_results = filtered;
        result.cost_ms = start.elapsed().as_secs_f64() * 1000.0;

        log::debug!(
            "template match done: all={}, filtered={}, success={}, cost={:.1}ms",
            result.all_results.len(),
            result.filtered_results.len(),
            result.success(),
            result.cost_ms
        );
        result
    }

    fn threshold_for(&self, index: usize) -> f64 {
        self.params
            .thresholds
            .get(index)
            .or_else(|| self.params.thresholds.last())
            .copied()
            .unwrap_or(0.7)
    }

    fn scale_steps(&self) -> Vec<f64> {
        if !self.params.multi_scale {
            return vec![1.0];
        }
        let [min_scale, max_scale] = self.params.scale_range;
        let step = self.params.scale_step.max(1e-3);

        let mut scales = Vec::new();
        let mut scale = min_scale;
        while scale <= max_scale + step / 2.0 {
            scales.push(scale);
            scale += step;
        }
        scales
    }

    /// Candidates for one template across every scale, NMS-deduplicated.
    ///
    /// Always yields at least one result: the best location found, or a
    /// zero-score placeholder when nothing cleared the pre-filter.
    fn match_one(&self, search: &Mat, roi_rect: Rect, template: &Mat) -> Result<Vec<MatchResult>> {
        let low = self.params.method.low_score_better();
        let mut candidates: Vec<MatchResult> = Vec::new();
        let mut best_overall: Option<MatchResult> = None;

        for scale in self.scale_steps() {
            let scaled = if (scale - 1.0).abs() < f64::EPSILON {
                template.clone()
            } else {
                let width = ((template.cols() as f64 * scale) as i32).max(1);
                let height = ((template.rows() as f64 * scale) as i32).max(1);
                let mut scaled = Mat::default();
                imgproc::resize(
                    template,
                    &mut scaled,
                    Size::new(width, height),
                    0.0,
                    0.0,
                    imgproc::INTER_LINEAR,
                )?;
                scaled
            };

            let (width, height) = (scaled.cols(), scaled.rows());
            if width > search.cols() || height > search.rows() {
                continue;
            }

            let mask = if self.params.green_mask {
                ImageUtils::chroma_mask(&scaled)?
            } else {
                None
            };

            let mut scored = Mat::default();
            match &mask {
                Some(mask) => imgproc::match_template(
                    search,
                    &scaled,
                    &mut scored,
                    self.params.method.to_opencv(),
                    mask,
                )?,
                None => imgproc::match_template(
                    search,
                    &scaled,
                    &mut scored,
                    self.params.method.to_opencv(),
                    &core::no_array(),
                )?,
            }

            let (mut min_val, mut max_val) = (0.0f64, 0.0f64);
            let (mut min_loc, mut max_loc) = (core::Point::default(), core::Point::default());
            core::min_max_loc(
                &scored,
                Some(&mut min_val),
                Some(&mut max_val),
                Some(&mut min_loc),
                Some(&mut max_loc),
                &core::no_array(),
            )?;

            let (best_score, best_loc) = if low {
                (min_val, min_loc)
            } else {
                (max_val, max_loc)
            };
            if best_score.is_finite() {
                let bbox = Rect::new(best_loc.x + roi_rect.x, best_loc.y + roi_rect.y, width, height);
                let candidate = MatchResult::new(bbox, best_score);
                let improves = match best_overall {
                    Some(best) if low => best_score < best.score,
                    Some(best) => best_score > best.score,
                    None => true,
                };
                if improves {
                    best_overall = Some(candidate);
                }
            }

            let mut local: Vec<MatchResult> = Vec::new();
            for y in 0..scored.rows() {
                for x in 0..scored.cols() {
                    let score = *scored.at_2d::<f32>(y, x)? as f64;
                    if !score.is_finite() {
                        continue;
                    }
                    if passes_threshold(score, PRE_FILTER_THRESHOLD, low) {
                        let bbox = Rect::new(x + roi_rect.x, y + roi_rect.y, width, height);
                        local.push(MatchResult::new(bbox, score));
                    }
                }
            }

            if local.len() > MAX_CANDIDATES {
                sort_results(&mut local, visor_core::OrderBy::Score, low);
                local.truncate(MAX_CANDIDATES);
            }
            candidates.extend(local);
        }

        if candidates.is_empty() {
            // At least one result per attempted template.
            let placeholder = best_overall.unwrap_or_else(|| {
                MatchResult::new(
                    Rect::new(roi_rect.x, roi_rect.y, template.cols(), template.rows()),
                    0.0,
                )
            });
            candidates.push(placeholder);
        }

        Ok(nms(candidates, TEMPLATE_NMS_IOU, low))
    }
}
