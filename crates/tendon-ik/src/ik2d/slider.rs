//! Keep a bone on a line segment, as close to the target as the segment
//! allows.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::skeleton::BoneId;
use tendon_core::transform::Transform2;

use super::aim;
use crate::modifier::{Modifier, ModifierContext, SolveOutcome};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Slider2DConfig {
    #[serde(default)]
    pub bone: Option<BoneId>,

    #[serde(default)]
    pub target: Option<NodeRef>,

    /// Segment start.
    #[serde(default)]
    pub point_one: Option<NodeRef>,

    /// Segment end.
    #[serde(default)]
    pub point_two: Option<NodeRef>,

    /// Also turn the bone to face the target.
    #[serde(default)]
    pub rotate_to_target: bool,

    #[serde(default)]
    pub additional_rotation: f32,
}

impl Slider2DConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.additional_rotation.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "additional_rotation".into(),
                message: "must be finite".into(),
            });
        }
        Ok(())
    }
}

/// Closest point to `point` on the segment `start..end`. A zero-length
/// segment collapses to `start`.
pub fn project_onto_segment(
    point: Vector2<f32>,
    start: Vector2<f32>,
    end: Vector2<f32>,
) -> Vector2<f32> {
    let along = end - start;
    let length_squared = along.norm_squared();
    if length_squared <= f32::EPSILON {
        return start;
    }
    let t = ((point - start).dot(&along) / length_squared).clamp(0.0, 1.0);
    start + along * t
}

/// Point-on-line joint.
#[derive(Debug, Clone)]
pub struct Slider2D {
    config: Slider2DConfig,
}

impl Slider2D {
    pub fn new(config: Slider2DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &Slider2DConfig {
        &self.config
    }

    fn point(
        ctx: &ModifierContext<'_, Transform2>,
        reference: Option<&NodeRef>,
        field: &str,
    ) -> Result<Vector2<f32>, SolveError> {
        Ok(ctx
            .resolve_pose(reference, SolveError::MissingReference(field.into()))?
            .origin)
    }
}

impl Modifier<Transform2> for Slider2D {
    type Config = Slider2DConfig;

    fn name(&self) -> &str {
        "slider_2d"
    }

    fn configure(&mut self, config: Slider2DConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut ModifierContext<'_, Transform2>,
    ) -> Result<SolveOutcome, SolveError> {
        let target = ctx
            .resolve_pose(self.config.target.as_ref(), SolveError::MissingTarget)?
            .origin;
        let start = Self::point(ctx, self.config.point_one.as_ref(), "point_one")?;
        let end = Self::point(ctx, self.config.point_two.as_ref(), "point_two")?;
        let bone = self.config.bone.ok_or(SolveError::MissingBone { joint: 0 })?;

        let mut pose = ctx.pose(bone)?;
        pose.origin = project_onto_segment(target, start, end);
        if self.config.rotate_to_target {
            let rest_angle = ctx.skeleton.bone(bone)?.rest_angle();
            if let Some(aimed) = aim(&pose, target, self.config.additional_rotation, rest_angle) {
                pose = aimed;
            }
        }
        let written = ctx.set_pose(bone, pose)?;

        let residual = (pose.origin - target).norm();
        Ok(SolveOutcome {
            converged: residual <= f32::EPSILON,
            iterations: 1,
            residual,
            skipped_joints: usize::from(!written),
        })
    }
}
