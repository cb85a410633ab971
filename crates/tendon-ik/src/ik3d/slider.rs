//! Keep a 3D bone on a line segment.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::skeleton::BoneId;
use tendon_core::transform::{BasisAxis, Transform3};

use super::{look_at, up_hint, validate_euler, with_rest_scale};
use crate::modifier::{Modifier, ModifierContext, SolveOutcome};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Slider3DConfig {
    #[serde(default)]
    pub bone: Option<BoneId>,

    #[serde(default)]
    pub target: Option<NodeRef>,

    #[serde(default)]
    pub point_one: Option<NodeRef>,

    #[serde(default)]
    pub point_two: Option<NodeRef>,

    #[serde(default)]
    pub rotate_to_target: bool,

    #[serde(default)]
    pub additional_rotation: Vector3<f32>,

    #[serde(default)]
    pub up_axis: BasisAxis,
}

impl Slider3DConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_euler("additional_rotation", &self.additional_rotation)
    }
}

pub fn project_onto_segment(
    point: Vector3<f32>,
    start: Vector3<f32>,
    end: Vector3<f32>,
) -> Vector3<f32> {
    let along = end - start;
    let length_squared = along.norm_squared();
    if length_squared <= f32::EPSILON {
        return start;
    }
    let t = ((point - start).dot(&along) / length_squared).clamp(0.0, 1.0);
    start + along * t
}

#[derive(Debug, Clone)]
pub struct Slider3D {
    config: Slider3DConfig,
}

impl Slider3D {
    pub fn new(config: Slider3DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &Slider3DConfig {
        &self.config
    }

    fn point(
        ctx: &ModifierContext<'_, Transform3>,
        reference: Option<&NodeRef>,
        field: &str,
    ) -> Result<Vector3<f32>, SolveError> {
        Ok(ctx
            .resolve_pose(reference, SolveError::MissingReference(field.into()))?
            .origin)
    }
}

impl Modifier<Transform3> for Slider3D {
    type Config = Slider3DConfig;

    fn name(&self) -> &str {
        "slider_3d"
    }

    fn configure(&mut self, config: Slider3DConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut ModifierContext<'_, Transform3>,
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
            let up = up_hint(ctx, bone, self.config.up_axis)?;
            if let Some(aimed) = look_at(&pose, target, up) {
                pose = with_rest_scale(
                    ctx,
                    bone,
                    aimed.with_additional_rotation(self.config.additional_rotation),
                )?;
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
