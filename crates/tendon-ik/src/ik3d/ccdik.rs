//! Cyclic coordinate descent over a 3D chain.
//!
//! A joint either turns freely (shortest arc from tip to target) or about
//! one of its own basis axes, in which case its angle constraint limits
//! the twist about that axis.

use bevy::log::debug;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use tendon_core::angle::AngleConstraint;
use tendon_core::config::validate_tolerance;
use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::skeleton::BoneId;
use tendon_core::transform::{BasisAxis, DEGENERATE_EPSILON, Transform3, quat_from_two_vectors};

use super::{constrain_axis, unit_axis};
use crate::joint::{CcdSolveMode, resize_joints};
use crate::modifier::{Modifier, ModifierContext, SolveOutcome, joint_bone};

/// Axis a CCD joint may turn about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CcdAxis {
    X,
    Y,
    Z,
    /// Any axis.
    #[default]
    Full,
}

impl CcdAxis {
    fn basis_axis(self) -> Option<BasisAxis> {
        match self {
            Self::X => Some(BasisAxis::X),
            Self::Y => Some(BasisAxis::Y),
            Self::Z => Some(BasisAxis::Z),
            Self::Full => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CcdJoint3D {
    #[serde(default)]
    pub bone: Option<BoneId>,

    #[serde(default)]
    pub axis: CcdAxis,

    /// Twist limit about `axis`. Ignored for [`CcdAxis::Full`].
    #[serde(default)]
    pub constraint: AngleConstraint,
}

impl CcdJoint3D {
    pub fn new(bone: BoneId) -> Self {
        Self {
            bone: Some(bone),
            ..Self::default()
        }
    }

    pub fn about(bone: BoneId, axis: CcdAxis) -> Self {
        Self {
            bone: Some(bone),
            axis,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CcdIk3DConfig {
    #[serde(default)]
    pub target: Option<NodeRef>,

    #[serde(default)]
    pub tip: Option<NodeRef>,

    #[serde(default)]
    pub solve_mode: CcdSolveMode,

    #[serde(default = "default_tolerance")]
    pub tolerance: f32,

    #[serde(default)]
    pub joints: Vec<CcdJoint3D>,
}

const fn default_tolerance() -> f32 {
    0.01
}

impl Default for CcdIk3DConfig {
    fn default() -> Self {
        Self {
            target: None,
            tip: None,
            solve_mode: CcdSolveMode::default(),
            tolerance: default_tolerance(),
            joints: Vec::new(),
        }
    }
}

impl CcdIk3DConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_tolerance(self.tolerance)
    }
}

/// Signed angle about `axis` that turns `from` onto `to`, both projected
/// onto the plane normal to `axis`.
fn planar_angle(axis: Vector3<f32>, from: Vector3<f32>, to: Vector3<f32>) -> Option<f32> {
    let axis = axis.try_normalize(DEGENERATE_EPSILON)?;
    let from = (from - axis * axis.dot(&from)).try_normalize(DEGENERATE_EPSILON)?;
    let to = (to - axis * axis.dot(&to)).try_normalize(DEGENERATE_EPSILON)?;
    Some(axis.dot(&from.cross(&to)).atan2(from.dot(&to)))
}

#[derive(Debug, Clone)]
pub struct CcdIk3D {
    config: CcdIk3DConfig,
}

impl CcdIk3D {
    pub fn new(config: CcdIk3DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &CcdIk3DConfig {
        &self.config
    }

    pub fn set_joint_count(&mut self, count: usize) {
        resize_joints(&mut self.config.joints, count);
    }

    fn tip(&self, ctx: &ModifierContext<'_, Transform3>) -> Result<Vector3<f32>, SolveError> {
        Ok(ctx
            .resolve_pose(self.config.tip.as_ref(), SolveError::MissingTip)?
            .origin)
    }

    fn step(
        &self,
        ctx: &mut ModifierContext<'_, Transform3>,
        index: usize,
        target: Vector3<f32>,
    ) -> Result<bool, SolveError> {
        let joint = &self.config.joints[index];
        let bone = joint_bone(index, joint.bone)?;
        let pose = ctx.pose(bone)?;
        let to_tip = self.tip(ctx)? - pose.origin;
        let to_target = target - pose.origin;

        let turned = match joint.axis.basis_axis() {
            None => quat_from_two_vectors(to_tip, to_target).map(|arc| pose.pre_rotated(&arc)),
            Some(axis) => match planar_angle(pose.axis(axis), to_tip, to_target) {
                Some(angle) => {
                    let turned = pose.rotated_local(&unit_axis(axis), angle);
                    Some(constrain_axis(ctx, bone, turned, axis, &joint.constraint)?)
                }
                None => None,
            },
        };
        match turned {
            Some(pose) => ctx.set_pose(bone, pose),
            None => {
                debug!("tendon-ik: ccd_3d joint {index} has no usable turn toward the target");
                Ok(false)
            }
        }
    }
}

impl Modifier<Transform3> for CcdIk3D {
    type Config = CcdIk3DConfig;

    fn name(&self) -> &str {
        "ccd_3d"
    }

    fn configure(&mut self, config: CcdIk3DConfig) -> Result<(), ConfigError> {
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
        self.tip(ctx)?;
        if self.config.joints.is_empty() {
            return Err(SolveError::NoJoints);
        }

        let mut skipped = 0;
        for index in self.config.solve_mode.sweep(self.config.joints.len()) {
            if !self.step(ctx, index, target)? {
                skipped += 1;
            }
        }

        let residual = (self.tip(ctx)? - target).norm();
        Ok(SolveOutcome {
            converged: residual <= self.config.tolerance,
            iterations: 1,
            residual,
            skipped_joints: skipped,
        })
    }
}
