//! Closed-form two-bone IK in 3D.
//!
//! Bone one is bent about the normal of the plane the chain already lies
//! in until the shoulder-to-tip distance matches the target distance, bone
//! two is bent to close the triangle, and then the whole chain is swung
//! onto the target. A straight chain has no plane; the pole (or bone one's
//! local X axis) supplies it.

use bevy::log::debug;
use nalgebra::{Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::skeleton::BoneId;
use tendon_core::transform::{BasisAxis, DEGENERATE_EPSILON, Transform3, quat_from_two_vectors};

use super::{add_rotation, aim_bone, bone_tip, up_hint, validate_euler};
use crate::ik2d::cosine_angle;
use crate::modifier::{Modifier, ModifierContext, SolveOutcome};

/// Tip-to-target distance still reported as converged.
const REACH_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TwoBoneIk3DConfig {
    #[serde(default)]
    pub target: Option<NodeRef>,

    /// Aim bone one at `pole` before solving so the joint bends toward it.
    #[serde(default)]
    pub use_pole: bool,

    #[serde(default)]
    pub pole: Option<NodeRef>,

    #[serde(default)]
    pub bone_one: Option<BoneId>,

    #[serde(default)]
    pub bone_two: Option<BoneId>,

    #[serde(default)]
    pub bone_one_additional_rotation: Vector3<f32>,

    #[serde(default)]
    pub bone_two_additional_rotation: Vector3<f32>,
}

impl TwoBoneIk3DConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_euler("bone_one_additional_rotation", &self.bone_one_additional_rotation)?;
        validate_euler("bone_two_additional_rotation", &self.bone_two_additional_rotation)
    }
}

#[derive(Debug, Clone)]
pub struct TwoBoneIk3D {
    config: TwoBoneIk3DConfig,
}

/// Resolved inputs of one solve.
struct Limb {
    one: BoneId,
    two: BoneId,
    length_two: f32,
    target: Vector3<f32>,
    pole: Option<Vector3<f32>>,
}

impl TwoBoneIk3D {
    pub fn new(config: TwoBoneIk3DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &TwoBoneIk3DConfig {
        &self.config
    }

    /// Bend the chain so its tip lands on the target. Returns `false` when
    /// the triangle was degenerate and nothing was written.
    fn bend(ctx: &mut ModifierContext<'_, Transform3>, limb: &Limb) -> Result<bool, SolveError> {
        let pose_one = ctx.pose(limb.one)?;
        let pose_two = ctx.pose(limb.two)?;
        let a = pose_one.origin;
        let b = pose_two.origin;
        let c = bone_tip(&pose_two, limb.length_two);
        let to_target = limb.target - a;

        let upper = (b - a).norm();
        let lower = (c - b).norm();
        let reach = to_target.norm();
        let (Some(shoulder), Some(elbow)) = (
            cosine_angle(reach, upper, lower),
            cosine_angle(upper, lower, reach),
        ) else {
            debug!("tendon-ik: two_bone_3d triangle is degenerate, skipping this tick");
            return Ok(false);
        };

        let normal = (c - a)
            .cross(&(b - a))
            .try_normalize(DEGENERATE_EPSILON)
            .or_else(|| {
                let pole = limb.pole?;
                (c - a).cross(&(pole - a)).try_normalize(DEGENERATE_EPSILON)
            })
            .or_else(|| pose_one.axis(BasisAxis::X).try_normalize(DEGENERATE_EPSILON));
        let Some(normal) = normal.map(Unit::new_unchecked) else {
            return Ok(false);
        };

        let shoulder_now = (c - a).angle(&(b - a));
        let elbow_now = (a - b).angle(&(c - b));
        let bend_one = UnitQuaternion::from_axis_angle(&normal, shoulder - shoulder_now);
        ctx.set_pose(limb.one, pose_one.pre_rotated(&bend_one))?;
        let bend_two = UnitQuaternion::from_axis_angle(&normal, elbow - elbow_now);
        let pose_two = ctx.pose(limb.two)?;
        ctx.set_pose(limb.two, pose_two.pre_rotated(&bend_two))?;

        let tip = bone_tip(&ctx.pose(limb.two)?, limb.length_two);
        if let Some(swing) = quat_from_two_vectors(tip - a, to_target) {
            let pose_one = ctx.pose(limb.one)?;
            ctx.set_pose(limb.one, pose_one.pre_rotated(&swing))?;
        }
        Ok(true)
    }
}

impl Modifier<Transform3> for TwoBoneIk3D {
    type Config = TwoBoneIk3DConfig;

    fn name(&self) -> &str {
        "two_bone_3d"
    }

    fn configure(&mut self, config: TwoBoneIk3DConfig) -> Result<(), ConfigError> {
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
        let pole = if self.config.use_pole {
            Some(
                ctx.resolve_pose(self.config.pole.as_ref(), SolveError::MissingPole)?
                    .origin,
            )
        } else {
            None
        };
        let one = self.config.bone_one.ok_or(SolveError::MissingBone { joint: 0 })?;
        let two = self.config.bone_two.ok_or(SolveError::MissingBone { joint: 1 })?;
        let length_one = ctx.pose_length(0, one)?;
        let length_two = ctx.pose_length(1, two)?;
        let up_one = up_hint(ctx, one, BasisAxis::Y)?;
        let up_two = up_hint(ctx, two, BasisAxis::Y)?;

        if let Some(pole) = pole {
            aim_bone(ctx, one, pole, up_one)?;
            aim_bone(ctx, two, target, up_two)?;
        }

        let limb = Limb {
            one,
            two,
            length_two,
            target,
            pole,
        };
        let origin = ctx.pose(one)?.origin;
        let reachable = (target - origin).norm() <= length_one + length_two;
        let mut skipped = 0;
        if reachable {
            if !Self::bend(ctx, &limb)? {
                skipped = 2;
            }
        } else {
            for (bone, up) in [(one, up_one), (two, up_two)] {
                if !aim_bone(ctx, bone, target, up)? {
                    skipped += 1;
                }
            }
        }
        add_rotation(ctx, one, self.config.bone_one_additional_rotation)?;
        add_rotation(ctx, two, self.config.bone_two_additional_rotation)?;

        let residual = (bone_tip(&ctx.pose(two)?, length_two) - target).norm();
        Ok(SolveOutcome {
            converged: reachable && residual <= REACH_TOLERANCE,
            iterations: 1,
            residual,
            skipped_joints: skipped,
        })
    }
}
