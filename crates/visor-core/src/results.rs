//! Recognition results and result-set operations.
//!
//! Every matcher emits the same [`RecoResult`] shape; the helpers here
//! (NMS, ordering, index selection) keep de-duplication and tie-breaking
//! consistent across strategies.

use crate::geometry::Rect;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One candidate produced by a matcher.
///
/// Score semantics depend on the producing method: higher is better by
/// default, lower is better for distance-style metrics. The direction is
/// always carried as an explicit flag by the caller, never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub bbox: Rect,
    pub score: f64,
}

impl MatchResult {
    pub fn new(bbox: Rect, score: f64) -> Self {
        Self { bbox, score }
    }
}

/// Ordering policy applied to result lists before index selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderBy {
    /// Left to right, then top to bottom.
    #[default]
    Horizontal,
    /// Top to bottom, then left to right.
    Vertical,
    /// Best score first (direction-aware).
    Score,
    /// Largest box first.
    Area,
    /// Shuffled.
    Random,
}

/// Aggregate outcome of one matcher invocation.
///
/// `all_results` holds every raw candidate, `filtered_results` only the
/// candidates that passed the matcher's acceptance threshold, after
/// de-duplication and ordering. Immutable once returned.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoResult {
    pub algorithm: String,
    pub best_result: Option<MatchResult>,
    pub all_results: Vec<MatchResult>,
    pub filtered_results: Vec<MatchResult>,
    pub cost_ms: f64,
    #[serde(skip)]
    pub debug_image: Option<image::RgbImage>,
}

impl RecoResult {
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            ..Default::default()
        }
    }

    /// A recognition succeeded when a best result was selected.
    pub fn success(&self) -> bool {
        self.best_result.is_some()
    }

    pub fn bbox(&self) -> Option<Rect> {
        self.best_result.map(|r| r.bbox)
    }

    /// Score of the selected result, 0.0 when there is none.
    pub fn score(&self) -> f64 {
        self.best_result.map(|r| r.score).unwrap_or(0.0)
    }
}

fn compare_scores(a: f64, b: f64, low_score_better: bool) -> Ordering {
    let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    if low_score_better { ord } else { ord.reverse() }
}

/// Whether `score` clears `threshold` for the given score direction.
pub fn passes_threshold(score: f64, threshold: f64, low_score_better: bool) -> bool {
    if low_score_better {
        score <= threshold
    } else {
        score >= threshold
    }
}

/// Greedy non-maximum suppression.
///
/// Keeps the best-scoring box per overlap cluster; a candidate is dropped
/// when its IoU against any kept box reaches `iou_threshold`.
pub fn nms(results: Vec<MatchResult>, iou_threshold: f64, low_score_better: bool) -> Vec<MatchResult> {
    if results.len() < 2 {
        return results;
    }

    let mut sorted = results;
    sorted.sort_by(|a, b| compare_scores(a.score, b.score, low_score_better));

    let mut keep: Vec<MatchResult> = Vec::with_capacity(sorted.len());
    for candidate in sorted {
        if keep.iter().all(|k| k.bbox.iou(&candidate.bbox) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Order results in place per policy. `Score` honors the score direction.
pub fn sort_results(results: &mut [MatchResult], order_by: OrderBy, low_score_better: bool) {
    match order_by {
        OrderBy::Horizontal => results.sort_by_key(|r| (r.bbox.x, r.bbox.y)),
        OrderBy::Vertical => results.sort_by_key(|r| (r.bbox.y, r.bbox.x)),
        OrderBy::Score => {
            results.sort_by(|a, b| compare_scores(a.score, b.score, low_score_better));
        }
        OrderBy::Area => {
            results.sort_by(|a, b| {
                b.bbox
                    .area()
                    .partial_cmp(&a.bbox.area())
                    .unwrap_or(Ordering::Equal)
            });
        }
        OrderBy::Random => results.shuffle(&mut rand::thread_rng()),
    }
}

/// Map an index in `[-len, len - 1]` onto `[0, len - 1]`.
///
/// Negative values count from the end (-1 selects the last element);
/// anything outside the range selects nothing.
pub fn select_index(len: usize, index: i64) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    fn result(x: i32, y: i32, score: f64) -> MatchResult {
        MatchResult::new(Rect::new(x, y, 10, 10), score)
    }

    #[test]
    fn test_nms_keeps_best_per_cluster() {
        let results = vec![result(0, 0, 0.9), result(2, 2, 0.8), result(50, 50, 0.7)];
        let kept = nms(results, 0.5, false);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
    }

    #[test]
    fn test_nms_direction_aware() {
        // Lower is better: the 0.1 box wins its cluster.
        let results = vec![result(0, 0, 0.9), result(2, 2, 0.1)];
        let kept = nms(results, 0.5, true);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.1);
    }

    #[test]
    fn test_nms_invariant_no_heavy_overlap_survives() {
        let results = vec![
            result(0, 0, 0.9),
            result(1, 1, 0.8),
            result(2, 2, 0.7),
            result(40, 0, 0.6),
        ];
        let kept = nms(results, 0.5, false);
        for (i, a) in kept.iter().enumerate() {
            for b in kept.iter().skip(i + 1) {
                assert!(a.bbox.iou(&b.bbox) < 0.5);
            }
        }
    }

    #[test]
    fn test_sort_horizontal_then_vertical() {
        let mut results = vec![result(30, 0, 0.1), result(10, 5, 0.2), result(10, 1, 0.3)];
        sort_results(&mut results, OrderBy::Horizontal, false);
        assert_eq!(results[0].bbox, Rect::new(10, 1, 10, 10));
        assert_eq!(results[2].bbox, Rect::new(30, 0, 10, 10));

        sort_results(&mut results, OrderBy::Vertical, false);
        assert_eq!(results[0].bbox, Rect::new(30, 0, 10, 10));
    }

    #[test]
    fn test_sort_by_score_respects_direction() {
        let mut results = vec![result(0, 0, 0.2), result(20, 0, 0.8)];
        sort_results(&mut results, OrderBy::Score, false);
        assert_eq!(results[0].score, 0.8);
        sort_results(&mut results, OrderBy::Score, true);
        assert_eq!(results[0].score, 0.2);
    }

    #[test]
    fn test_select_index_negative() {
        assert_eq!(select_index(3, -1), Some(2));
        assert_eq!(select_index(3, -3), Some(0));
        assert_eq!(select_index(3, 2), Some(2));
        assert_eq!(select_index(3, 3), None);
        assert_eq!(select_index(3, -4), None);
        assert_eq!(select_index(0, 0), None);
    }

    #[test]
    fn test_passes_threshold_directions() {
        assert!(passes_threshold(0.8, 0.7, false));
        assert!(!passes_threshold(0.6, 0.7, false));
        assert!(passes_threshold(0.1, 0.2, true));
        assert!(!passes_threshold(0.3, 0.2, true));
    }

    #[test]
    fn test_reco_result_accessors() {
        let mut result = RecoResult::new("TemplateMatch");
        assert!(!result.success());
        assert_eq!(result.score(), 0.0);

        result.best_result = Some(MatchResult::new(Rect::new(1, 2, 3, 4), 0.9));
        assert!(result.success());
        assert_eq!(result.bbox(), Some(Rect::new(1, 2, 3, 4)));
    }
}
