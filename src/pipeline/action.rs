//! Action kinds and target resolution.

use visor_core::{Point, RecoResult};

/// Fixed point used when a pointer target cannot be resolved any other way.
pub(crate) const FALLBACK_POINT: Point = Point { x: 960, y: 540 };

/// Where a pointer action lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Center of the last recognized box.
    Auto,
    /// Literal coordinates.
    Point(Point),
    /// The fixed fallback point.
    Fallback,
}

impl Target {
    /// Resolve to concrete coordinates, shifted by the first two offset
    /// components. `Auto` without a recognized box degrades to the
    /// fallback point.
    pub(crate) fn resolve(&self, reco: &RecoResult, offset: [i32; 4]) -> Point {
        let base = match self {
            Target::Auto => reco.bbox().map(|b| b.center()).unwrap_or(FALLBACK_POINT),
            Target::Point(point) => *point,
            Target::Fallback => FALLBACK_POINT,
        };
        Point::new(base.x + offset[0], base.y + offset[1])
    }
}

/// What a node does once its recognition succeeds, one variant per kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    DoNothing,
    Click {
        target: Target,
        offset: [i32; 4],
    },
    LongPress {
        target: Target,
        offset: [i32; 4],
        duration_ms: u64,
    },
    Swipe {
        begin: Target,
        end: Point,
        duration_ms: u64,
    },
    InputText {
        text: String,
    },
    Wait {
        duration_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use visor_core::{MatchResult, Rect};

    fn reco_with_box() -> RecoResult {
        let mut reco = RecoResult::new("TemplateMatch");
        reco.best_result = Some(MatchResult::new(Rect::new(100, 200, 40, 20), 0.9));
        reco
    }

    #[test]
    fn test_auto_target_uses_box_center_plus_offset() {
        let point = Target::Auto.resolve(&reco_with_box(), [5, -10, 0, 0]);
        assert_eq!(point, Point::new(125, 200));
    }

    #[test]
    fn test_auto_target_without_box_falls_back() {
        let reco = RecoResult::new("TemplateMatch");
        let point = Target::Auto.resolve(&reco, [0, 0, 0, 0]);
        assert_eq!(point, FALLBACK_POINT);
    }

    #[test]
    fn test_literal_target() {
        let point = Target::Point(Point::new(10, 20)).resolve(&reco_with_box(), [1, 2, 0, 0]);
        assert_eq!(point, Point::new(11, 22));
    }
}
