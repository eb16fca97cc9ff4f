//! Output-size planning for derived images.
//!
//! Two paths:
//! - a preferred (width, height) whose ratio equals the source ratio exactly,
//!   picking the one whose area is closest to `target²`;
//! - otherwise a free-form size with the long edge at `target`, both edges
//!   snapped to multiples of `SIZE_MULTIPLE`.

use serde::{Deserialize, Serialize};

use super::ProcessingError;
use crate::config::{MAX_OUTPUT_DIMENSION, SIZE_MULTIPLE};

/// How free-form edges snap to `SIZE_MULTIPLE`.
///
/// `Nearest` rounds half away from zero: 682.67 → 672. `Up` takes the ceiling:
/// 682.67 → 704.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeRounding {
    #[default]
    Nearest,
    Up,
}

impl SizeRounding {
    fn snap(self, value: f64) -> u32 {
        let steps = value / SIZE_MULTIPLE as f64;
        let steps = match self {
            Self::Nearest => steps.round(),
            Self::Up => steps.ceil(),
        };
        (steps.max(0.0) as u32).saturating_mul(SIZE_MULTIPLE)
    }
}

/// Which path produced a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    Preferred,
    FreeForm,
}

/// Chosen output dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionPlan {
    pub width: u32,
    pub height: u32,
    pub source: PlanSource,
}

impl ResolutionPlan {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Planner configured with the consumer's preferred list.
#[derive(Debug, Clone, Default)]
pub struct ResolutionPlanner {
    preferred: Vec<(u32, u32)>,
    rounding: SizeRounding,
}

impl ResolutionPlanner {
    pub fn new(preferred: Vec<(u32, u32)>, rounding: SizeRounding) -> Self {
        Self {
            preferred,
            rounding,
        }
    }

    pub fn preferred(&self) -> &[(u32, u32)] {
        &self.preferred
    }

    pub fn plan(
        &self,
        source_w: u32,
        source_h: u32,
        target_resolution: u32,
    ) -> Result<ResolutionPlan, ProcessingError> {
        plan_resolution(source_w, source_h, target_resolution, &self.preferred, self.rounding)
    }
}

/// Plan the output size of a derived image.
///
/// Errors:
/// - `InvalidDimensions` for a zero source edge or zero target, or a source
///   smaller than the target on both axes (upscale first).
/// - `SizeOutOfBounds` when a free-form edge rounds to 0 or exceeds
///   `MAX_OUTPUT_DIMENSION`.
pub fn plan_resolution(
    source_w: u32,
    source_h: u32,
    target_resolution: u32,
    preferred: &[(u32, u32)],
    rounding: SizeRounding,
) -> Result<ResolutionPlan, ProcessingError> {
    if source_w == 0 || source_h == 0 {
        return Err(ProcessingError::InvalidDimensions(format!(
            "source is {source_w}x{source_h}"
        )));
    }
    if target_resolution == 0 {
        return Err(ProcessingError::InvalidDimensions(
            "target resolution is 0".into(),
        ));
    }
    if source_w < target_resolution && source_h < target_resolution {
        return Err(ProcessingError::InvalidDimensions(format!(
            "source {source_w}x{source_h} is below target {target_resolution} on both axes"
        )));
    }

    if let Some((width, height)) = closest_preferred(source_w, source_h, target_resolution, preferred) {
        return Ok(ResolutionPlan {
            width,
            height,
            source: PlanSource::Preferred,
        });
    }

    let aspect = source_w as f64 / source_h as f64;
    let target = target_resolution as f64;
    let (raw_w, raw_h) = if source_w >= source_h {
        (target, target / aspect)
    } else {
        (target * aspect, target)
    };

    let width = rounding.snap(raw_w);
    let height = rounding.snap(raw_h);
    if width == 0 || height == 0 || width > MAX_OUTPUT_DIMENSION || height > MAX_OUTPUT_DIMENSION {
        return Err(ProcessingError::SizeOutOfBounds { width, height });
    }

    Ok(ResolutionPlan {
        width,
        height,
        source: PlanSource::FreeForm,
    })
}

/// Exact-ratio preferred entry with area closest to `target²`; first wins ties.
fn closest_preferred(
    source_w: u32,
    source_h: u32,
    target_resolution: u32,
    preferred: &[(u32, u32)],
) -> Option<(u32, u32)> {
    let target_area = target_resolution as i128 * target_resolution as i128;
    preferred
        .iter()
        .copied()
        .filter(|&(w, h)| w > 0 && h > 0)
        // w / h == sw / sh, compared without floating point
        .filter(|&(w, h)| w as u64 * source_h as u64 == h as u64 * source_w as u64)
        .min_by_key(|&(w, h)| (w as i128 * h as i128 - target_area).abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free(w: u32, h: u32, target: u32) -> (u32, u32) {
        plan_resolution(w, h, target, &[], SizeRounding::Nearest)
            .unwrap()
            .dimensions()
    }

    #[test]
    fn landscape_nearest_rounding() {
        // 1024 / 1.5 = 682.67 -> 672
        assert_eq!(free(1200, 800, 1024), (1024, 672));
    }

    #[test]
    fn landscape_round_up() {
        let plan = plan_resolution(1200, 800, 1024, &[], SizeRounding::Up).unwrap();
        assert_eq!(plan.dimensions(), (1024, 704));
        assert_eq!(plan.source, PlanSource::FreeForm);
    }

    #[test]
    fn portrait_puts_target_on_height() {
        assert_eq!(free(800, 1200, 1024), (672, 1024));
    }

    #[test]
    fn square_source_is_square() {
        assert_eq!(free(3000, 3000, 512), (512, 512));
    }

    #[test]
    fn preferred_exact_aspect_wins() {
        let preferred = [(512, 512), (768, 512)];
        let plan = plan_resolution(1600, 1600, 512, &preferred, SizeRounding::Nearest).unwrap();
        assert_eq!(plan.dimensions(), (512, 512));
        assert_eq!(plan.source, PlanSource::Preferred);
    }

    #[test]
    fn preferred_picks_closest_area() {
        let preferred = [(512, 512), (1024, 1024), (2048, 2048)];
        let plan = plan_resolution(1600, 1600, 1024, &preferred, SizeRounding::Nearest).unwrap();
        assert_eq!(plan.dimensions(), (1024, 1024));
    }

    #[test]
    fn preferred_match_ignores_non_matching_ratios() {
        let preferred = [(512, 512), (768, 512)];
        let plan = plan_resolution(1200, 800, 1024, &preferred, SizeRounding::Nearest).unwrap();
        assert_eq!(plan.dimensions(), (768, 512));
        assert_eq!(plan.source, PlanSource::Preferred);
    }

    #[test]
    fn no_ratio_match_falls_back_to_free_form() {
        let preferred = [(512, 512), (768, 512)];
        let plan = plan_resolution(1920, 1080, 1024, &preferred, SizeRounding::Nearest).unwrap();
        assert_eq!(plan.source, PlanSource::FreeForm);
        // 1024 / 1.777 = 576
        assert_eq!(plan.dimensions(), (1024, 576));
    }

    #[test]
    fn free_form_always_multiple_of_32() {
        for (w, h) in [(1201, 799), (4000, 3001), (1000, 1999), (1333, 1000), (2500, 1100)] {
            for target in [512, 768, 1024, 1536] {
                if w < target && h < target {
                    // below target on both axes: rejected, not planned
                    assert!(plan_resolution(w, h, target, &[], SizeRounding::Nearest).is_err());
                    continue;
                }
                for rounding in [SizeRounding::Nearest, SizeRounding::Up] {
                    let plan = plan_resolution(w, h, target, &[], rounding).unwrap();
                    assert!(plan.width > 0 && plan.height > 0);
                    assert_eq!(plan.width % 32, 0, "{w}x{h}@{target}: {plan:?}");
                    assert_eq!(plan.height % 32, 0, "{w}x{h}@{target}: {plan:?}");
                }
            }
        }
    }

    #[test]
    fn zero_source_dimension_rejected() {
        let err = plan_resolution(0, 800, 1024, &[], SizeRounding::Nearest).unwrap_err();
        assert!(matches!(err, ProcessingError::InvalidDimensions(_)));
    }

    #[test]
    fn source_smaller_than_target_on_both_axes_rejected() {
        let err = plan_resolution(50, 50, 512, &[], SizeRounding::Nearest).unwrap_err();
        assert!(matches!(err, ProcessingError::InvalidDimensions(_)));
    }

    #[test]
    fn source_larger_on_one_axis_is_accepted() {
        assert_eq!(free(600, 400, 512), (512, 352));
    }

    #[test]
    fn extreme_aspect_collapses_short_edge() {
        // 1024 / 100 = 10.24 -> rounds to 0
        let err = plan_resolution(10_000, 100, 1024, &[], SizeRounding::Nearest).unwrap_err();
        assert!(matches!(err, ProcessingError::SizeOutOfBounds { height: 0, .. }));
    }

    #[test]
    fn oversized_target_rejected() {
        let err = plan_resolution(10_000, 10_000, 9000, &[], SizeRounding::Nearest).unwrap_err();
        assert!(matches!(err, ProcessingError::SizeOutOfBounds { .. }));
    }

    #[test]
    fn planner_uses_configured_list() {
        let planner = ResolutionPlanner::new(vec![(640, 480)], SizeRounding::Nearest);
        assert_eq!(planner.plan(1280, 960, 512).unwrap().dimensions(), (640, 480));
        assert_eq!(planner.preferred(), &[(640, 480)]);
    }

    #[test]
    fn rounding_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&SizeRounding::Up).unwrap(), "\"up\"");
        assert_eq!(serde_json::to_string(&SizeRounding::Nearest).unwrap(), "\"nearest\"");
    }
}
