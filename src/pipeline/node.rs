//! Pipeline nodes and configuration parsing.
//!
//! A node record in the configuration document is flat: the recognition
//! and action discriminators sit next to their kind-specific fields.
//! Parsing reads the raw record once, then dispatches on each
//! discriminator into a strongly typed variant.

use crate::pipeline::PipelineError;
use crate::pipeline::action::{Action, Target};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use visor_core::{OrderBy, Point, Rect};
use visor_cv::{
    ColorMatcherParams, ColorSpace, FeatureDetectorKind, FeatureMatcherParams, MatchMethod,
    TemplateMatcherParams, TemplateSource,
    color::ColorRange,
};

/// Recognition strategy for one node, one variant per kind.
#[derive(Debug, Clone)]
pub enum Recognition {
    /// Succeeds unconditionally over the ROI (or the full frame); used for
    /// unconditional transitions.
    DirectHit,
    TemplateMatch(TemplateMatcherParams),
    FeatureMatch(FeatureMatcherParams),
    ColorMatch(ColorMatcherParams),
}

/// One parsed node. Immutable once the pipeline is loaded.
#[derive(Debug, Clone)]
pub struct PipelineNode {
    pub name: String,
    pub recognition: Recognition,
    pub roi: Option<Rect>,
    pub action: Action,
    pub next: Vec<String>,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub pre_delay_ms: u64,
    pub post_delay_ms: u64,
    /// Invert the recognition verdict.
    pub inverse: bool,
    pub enabled: bool,
}

/// A scalar or a list of scalars; configuration accepts both.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

/// Raw node record as it appears in the configuration document.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawNode {
    recognition: Option<String>,
    template: Option<OneOrMany<String>>,
    threshold: Option<OneOrMany<f64>>,
    method: Option<Value>,
    green_mask: bool,
    multi_scale: Option<bool>,
    scale_range: Option<[f64; 2]>,
    scale_step: Option<f64>,
    detector: Option<FeatureDetectorKind>,
    ratio: Option<f64>,
    count: Option<usize>,
    lower: Option<Value>,
    upper: Option<Value>,
    connected: bool,
    order_by: Option<OrderBy>,
    index: Option<i64>,
    roi: Option<Vec<i32>>,
    action: Option<String>,
    target: Option<Value>,
    target_offset: Option<[i32; 4]>,
    begin: Option<Value>,
    end: Option<[i32; 2]>,
    duration: Option<u64>,
    input_text: Option<String>,
    next: Option<OneOrMany<String>>,
    timeout: Option<u64>,
    rate_limit: Option<u64>,
    pre_delay: Option<u64>,
    post_delay: Option<u64>,
    inverse: bool,
    enabled: Option<bool>,
}

impl PipelineNode {
    pub(crate) fn from_raw(name: &str, raw: RawNode) -> Result<Self> {
        let recognition = parse_recognition(&raw)?;
        let action = parse_action(&raw)?;

        let roi = match &raw.roi {
            Some(values) => Some(Rect::from_slice(values).context("invalid roi")?),
            None => None,
        };

        Ok(Self {
            name: name.to_string(),
            recognition,
            roi,
            action,
            next: raw.next.map(OneOrMany::into_vec).unwrap_or_default(),
            timeout_ms: raw.timeout.unwrap_or(20_000),
            rate_limit_ms: raw.rate_limit.unwrap_or(1_000),
            pre_delay_ms: raw.pre_delay.unwrap_or(200),
            post_delay_ms: raw.post_delay.unwrap_or(200),
            inverse: raw.inverse,
            enabled: raw.enabled.unwrap_or(true),
        })
    }
}

fn parse_recognition(raw: &RawNode) -> Result<Recognition> {
    let templates = || -> Vec<TemplateSource> {
        raw.template
            .clone()
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(TemplateSource::from)
            .collect()
    };
    let order_by = raw.order_by.unwrap_or_default();
    let result_index = raw.index.unwrap_or(0);

    match raw.recognition.as_deref().unwrap_or("DirectHit") {
        "DirectHit" => Ok(Recognition::DirectHit),
        "TemplateMatch" => Ok(Recognition::TemplateMatch(TemplateMatcherParams {
            templates: templates(),
            thresholds: raw
                .threshold
                .clone()
                .map(OneOrMany::into_vec)
                .unwrap_or_else(|| vec![0.7]),
            method: match &raw.method {
                Some(value) => {
                    serde_json::from_value(value.clone()).context("invalid match method")?
                }
                None => MatchMethod::default(),
            },
            green_mask: raw.green_mask,
            order_by,
            result_index,
            multi_scale: raw.multi_scale.unwrap_or(true),
            scale_range: raw.scale_range.unwrap_or([0.5, 1.5]),
            scale_step: raw.scale_step.unwrap_or(0.1),
            debug_draw: false,
        })),
        "FeatureMatch" => Ok(Recognition::FeatureMatch(FeatureMatcherParams {
            templates: templates(),
            detector: raw.detector.unwrap_or_default(),
            ratio: raw.ratio.unwrap_or(0.75),
            count: raw.count.unwrap_or(10),
            green_mask: raw.green_mask,
            order_by,
            result_index,
        })),
        "ColorMatch" => Ok(Recognition::ColorMatch(ColorMatcherParams {
            ranges: parse_ranges(raw.lower.as_ref(), raw.upper.as_ref())?,
            color_space: match &raw.method {
                Some(value) => {
                    serde_json::from_value(value.clone()).context("invalid color space")?
                }
                None => ColorSpace::default(),
            },
            count: raw.count.unwrap_or(1),
            connected: raw.connected,
            order_by,
            result_index,
        })),
        other => Err(PipelineError::UnknownRecognition(other.to_string()).into()),
    }
}

fn parse_action(raw: &RawNode) -> Result<Action> {
    match raw.action.as_deref().unwrap_or("DoNothing") {
        "DoNothing" => Ok(Action::DoNothing),
        "Click" => Ok(Action::Click {
            target: parse_target(raw.target.as_ref()),
            offset: raw.target_offset.unwrap_or_default(),
        }),
        "LongPress" => Ok(Action::LongPress {
            target: parse_target(raw.target.as_ref()),
            offset: raw.target_offset.unwrap_or_default(),
            duration_ms: raw.duration.unwrap_or(1_000),
        }),
        "Swipe" => Ok(Action::Swipe {
            begin: parse_target(raw.begin.as_ref()),
            end: raw
                .end
                .map(|[x, y]| Point::new(x, y))
                .unwrap_or_default(),
            duration_ms: raw.duration.unwrap_or(200),
        }),
        "InputText" => Ok(Action::InputText {
            text: raw.input_text.clone().unwrap_or_default(),
        }),
        "Wait" => Ok(Action::Wait {
            duration_ms: raw.duration.unwrap_or(1_000),
        }),
        other => Err(PipelineError::UnknownAction(other.to_string()).into()),
    }
}

/// `true` means the last recognized box, a 2-element list is a literal
/// point, anything else degrades to the fixed fallback point.
fn parse_target(value: Option<&Value>) -> Target {
    match value {
        None | Some(Value::Bool(true)) => Target::Auto,
        Some(Value::Array(values)) if values.len() >= 2 => {
            let component = |i: usize| values[i].as_i64().unwrap_or(0) as i32;
            Target::Point(Point::new(component(0), component(1)))
        }
        _ => Target::Fallback,
    }
}

/// Bounds may be one list (`[0, 100, 100]`) or a list of lists; lower and
/// upper are zipped pairwise.
fn parse_ranges(lower: Option<&Value>, upper: Option<&Value>) -> Result<Vec<ColorRange>> {
    let (Some(lower), Some(upper)) = (lower, upper) else {
        return Ok(Vec::new());
    };

    let to_lists = |value: &Value| -> Result<Vec<Vec<i32>>> {
        let lists: OneOrMany<Vec<i32>> =
            serde_json::from_value(value.clone()).context("invalid color bounds")?;
        Ok(match lists {
            OneOrMany::One(list) => vec![list],
            OneOrMany::Many(lists) => lists,
        })
    };

    let lower = to_lists(lower)?;
    let upper = to_lists(upper)?;
    Ok(lower
        .into_iter()
        .zip(upper)
        .map(|(lower, upper)| ColorRange::new(lower, upper))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_from(value: serde_json::Value) -> PipelineNode {
        let raw: RawNode = serde_json::from_value(value).unwrap();
        PipelineNode::from_raw("test", raw).unwrap()
    }

    #[test]
    fn test_defaults() {
        let node = node_from(json!({}));
        assert!(matches!(node.recognition, Recognition::DirectHit));
        assert_eq!(node.action, Action::DoNothing);
        assert_eq!(node.timeout_ms, 20_000);
        assert_eq!(node.rate_limit_ms, 1_000);
        assert_eq!(node.pre_delay_ms, 200);
        assert!(node.enabled);
        assert!(!node.inverse);
        assert!(node.next.is_empty());
    }

    #[test]
    fn test_scalars_promote_to_lists() {
        let node = node_from(json!({
            "recognition": "TemplateMatch",
            "template": "button.png",
            "threshold": 0.85,
            "next": "follow_up",
        }));

        let Recognition::TemplateMatch(params) = &node.recognition else {
            panic!("expected template recognition");
        };
        assert_eq!(params.templates.len(), 1);
        assert_eq!(params.thresholds, vec![0.85]);
        assert_eq!(node.next, vec!["follow_up".to_string()]);
    }

    #[test]
    fn test_template_method_accepts_numeric_code() {
        let node = node_from(json!({
            "recognition": "TemplateMatch",
            "template": ["a.png"],
            "method": 1,
            "multi_scale": false,
        }));

        let Recognition::TemplateMatch(params) = &node.recognition else {
            panic!("expected template recognition");
        };
        assert_eq!(params.method, MatchMethod::SqDiffNormed);
        assert!(!params.multi_scale);
    }

    #[test]
    fn test_feature_fields() {
        let node = node_from(json!({
            "recognition": "FeatureMatch",
            "template": ["logo.png"],
            "detector": "ORB",
            "ratio": 0.8,
            "count": 6,
        }));

        let Recognition::FeatureMatch(params) = &node.recognition else {
            panic!("expected feature recognition");
        };
        assert_eq!(params.detector, FeatureDetectorKind::Orb);
        assert_eq!(params.ratio, 0.8);
        assert_eq!(params.count, 6);
    }

    #[test]
    fn test_color_ranges_single_and_multi() {
        let node = node_from(json!({
            "recognition": "ColorMatch",
            "lower": [0, 100, 100],
            "upper": [10, 255, 255],
            "method": 40,
        }));
        let Recognition::ColorMatch(params) = &node.recognition else {
            panic!("expected color recognition");
        };
        assert_eq!(params.ranges.len(), 1);
        assert_eq!(params.color_space, ColorSpace::Hsv);

        let node = node_from(json!({
            "recognition": "ColorMatch",
            "lower": [[0, 0, 200], [200, 0, 0]],
            "upper": [[60, 60, 255], [255, 60, 60]],
            "method": "BGR",
        }));
        let Recognition::ColorMatch(params) = &node.recognition else {
            panic!("expected color recognition");
        };
        assert_eq!(params.ranges.len(), 2);
        assert_eq!(params.color_space, ColorSpace::Bgr);
    }

    #[test]
    fn test_action_target_variants() {
        let node = node_from(json!({
            "action": "Click",
            "target": [300, 400],
            "target_offset": [5, 6, 0, 0],
        }));
        assert_eq!(
            node.action,
            Action::Click {
                target: Target::Point(Point::new(300, 400)),
                offset: [5, 6, 0, 0],
            }
        );

        let node = node_from(json!({ "action": "Click", "target": true }));
        assert_eq!(
            node.action,
            Action::Click {
                target: Target::Auto,
                offset: [0; 4],
            }
        );

        let node = node_from(json!({ "action": "Click", "target": false }));
        assert_eq!(
            node.action,
            Action::Click {
                target: Target::Fallback,
                offset: [0; 4],
            }
        );
    }

    #[test]
    fn test_swipe_fields() {
        let node = node_from(json!({
            "action": "Swipe",
            "begin": [10, 20],
            "end": [110, 220],
            "duration": 500,
        }));
        assert_eq!(
            node.action,
            Action::Swipe {
                begin: Target::Point(Point::new(10, 20)),
                end: Point::new(110, 220),
                duration_ms: 500,
            }
        );
    }

    #[test]
    fn test_unknown_kinds_rejected() {
        let raw: RawNode = serde_json::from_value(json!({ "recognition": "Ocr" })).unwrap();
        assert!(PipelineNode::from_raw("bad", raw).is_err());

        let raw: RawNode = serde_json::from_value(json!({ "action": "Teleport" })).unwrap();
        assert!(PipelineNode::from_raw("bad", raw).is_err());
    }
}
