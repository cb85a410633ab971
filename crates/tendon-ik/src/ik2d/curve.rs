//! Lay a chain along a Bezier path.

use bevy::log::warn;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use tendon_core::curve::{BezierPoint, Curve2D};
use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::skeleton::BoneId;
use tendon_core::transform::{Affine, Transform2};

use super::aim;
use crate::joint::resize_joints;
use crate::modifier::{Modifier, ModifierContext, SolveOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CurveJoint2D {
    #[serde(default)]
    pub bone: Option<BoneId>,

    #[serde(default)]
    pub additional_rotation: f32,
}

impl CurveJoint2D {
    pub fn new(bone: BoneId) -> Self {
        Self {
            bone: Some(bone),
            additional_rotation: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveIk2DConfig {
    /// Node whose world transform places the control points. Without one
    /// the points are world positions.
    #[serde(default)]
    pub curve_node: Option<NodeRef>,

    #[serde(default)]
    pub control_points: Vec<BezierPoint<2>>,

    /// Rough spacing of baked samples, in curve units.
    #[serde(default = "default_bake_interval")]
    pub bake_interval: f32,

    /// Arc length at which the first joint is placed.
    #[serde(default)]
    pub starting_position: f32,

    /// Spread the chain over the whole curve instead of using bone lengths.
    #[serde(default)]
    pub stretch_bones_to_fit_curve: bool,

    /// While stretching, also scale the first bone by the same ratio.
    #[serde(default)]
    pub scale_bones_to_fit_curve: bool,

    #[serde(default)]
    pub joints: Vec<CurveJoint2D>,
}

const fn default_bake_interval() -> f32 {
    0.05
}

impl Default for CurveIk2DConfig {
    fn default() -> Self {
        Self {
            curve_node: None,
            control_points: Vec::new(),
            bake_interval: default_bake_interval(),
            starting_position: 0.0,
            stretch_bones_to_fit_curve: false,
            scale_bones_to_fit_curve: false,
            joints: Vec::new(),
        }
    }
}

impl CurveIk2DConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bake_interval.is_nan() || self.bake_interval <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "bake_interval".into(),
                message: format!("{} (must be > 0)", self.bake_interval),
            });
        }
        if !self.starting_position.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "starting_position".into(),
                message: "must be finite".into(),
            });
        }
        Ok(())
    }
}

/// Places each joint on the curve, one bone length apart, and aims it at
/// the next sample. Always a single pass.
#[derive(Debug, Clone)]
pub struct CurveIk2D {
    config: CurveIk2DConfig,
    /// Control points baked in curve-node space.
    baked: Curve2D,
}

impl CurveIk2D {
    pub fn new(config: CurveIk2DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let baked = Curve2D::from_bezier(&config.control_points, config.bake_interval);
        Ok(Self { config, baked })
    }

    pub const fn config(&self) -> &CurveIk2DConfig {
        &self.config
    }

    pub fn set_joint_count(&mut self, count: usize) {
        resize_joints(&mut self.config.joints, count);
    }

    /// The baked curve mapped into pose space for this tick.
    fn pose_curve(&self, ctx: &ModifierContext<'_, Transform2>) -> Result<Curve2D, SolveError> {
        let curve_world = match &self.config.curve_node {
            Some(node) => ctx.resolve_world(node)?,
            None => Transform2::identity(),
        };
        let space = ctx.skeleton.pose_space();
        Ok(self
            .baked
            .map_points(|p| space.point_to_pose(curve_world.xform(p))))
    }
}

impl Modifier<Transform2> for CurveIk2D {
    type Config = CurveIk2DConfig;

    fn name(&self) -> &str {
        "curve_2d"
    }

    fn configure(&mut self, config: CurveIk2DConfig) -> Result<(), ConfigError> {
        *self = Self::new(config)?;
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut ModifierContext<'_, Transform2>,
    ) -> Result<SolveOutcome, SolveError> {
        if self.config.control_points.is_empty() {
            return Err(SolveError::MissingCurve);
        }
        if self.config.joints.is_empty() {
            return Err(SolveError::NoJoints);
        }
        let curve = self.pose_curve(ctx)?;
        if curve.is_empty() {
            return Err(SolveError::EmptyCurve);
        }

        let mut lengths = Vec::with_capacity(self.config.joints.len());
        for (index, joint) in self.config.joints.iter().enumerate() {
            lengths.push(match joint.bone {
                Some(bone) => Some(ctx.pose_length(index, bone)?),
                None => None,
            });
        }

        let stretch = self.config.stretch_bones_to_fit_curve;
        let mut scale = 1.0;
        if stretch {
            let total: f32 = lengths.iter().flatten().sum();
            if total > f32::EPSILON {
                scale = curve.baked_length() / total;
            }
            if self.config.scale_bones_to_fit_curve {
                if let Some(first) = self.config.joints[0].bone {
                    let local = ctx.skeleton.local_transform(first)?;
                    ctx.notify(first)?;
                    ctx.skeleton.set_local_transform(
                        first,
                        Transform2::from_parts(local.rotation(), Vector2::repeat(scale), local.origin),
                    )?;
                }
            }
        }

        let mut position = self.config.starting_position;
        let mut skipped = 0;
        for (index, (joint, length)) in self.config.joints.iter().zip(&lengths).enumerate() {
            let (Some(bone), Some(length)) = (joint.bone, *length) else {
                warn!("tendon-ik: curve_2d joint {index} has no bone, skipping it");
                skipped += 1;
                continue;
            };
            let rest_angle = ctx.skeleton.bone(bone)?.rest_angle();

            let mut pose = ctx.pose(bone)?;
            pose.origin = curve.sample_baked(position).ok_or(SolveError::EmptyCurve)?;
            position += if stretch { length * scale } else { length };

            let look = curve.sample_baked(position).ok_or(SolveError::EmptyCurve)?;
            let pose = aim(&pose, look, joint.additional_rotation, rest_angle).unwrap_or_else(|| {
                skipped += 1;
                pose
            });
            ctx.set_pose(bone, pose)?;
        }

        let overshoot = (position - curve.baked_length()).max(0.0);
        Ok(SolveOutcome {
            converged: overshoot <= f32::EPSILON * 16.0,
            iterations: 1,
            residual: overshoot,
            skipped_joints: skipped,
        })
    }
}
