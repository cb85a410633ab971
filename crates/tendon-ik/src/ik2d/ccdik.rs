//! Cyclic coordinate descent over a 2D chain.

use bevy::log::debug;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use tendon_core::angle::AngleConstraint;
use tendon_core::config::validate_tolerance;
use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::skeleton::BoneId;
use tendon_core::transform::Transform2;

use super::constrain;
use crate::joint::resize_joints;
use crate::modifier::{Modifier, ModifierContext, SolveOutcome, joint_bone};

pub use crate::joint::CcdSolveMode;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CcdJoint2D {
    #[serde(default)]
    pub bone: Option<BoneId>,

    #[serde(default)]
    pub constraint: AngleConstraint,
}

impl CcdJoint2D {
    pub fn new(bone: BoneId) -> Self {
        Self {
            bone: Some(bone),
            constraint: AngleConstraint::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CcdIk2DConfig {
    #[serde(default)]
    pub target: Option<NodeRef>,

    /// Point driven onto the target, usually a marker past the last bone.
    #[serde(default)]
    pub tip: Option<NodeRef>,

    #[serde(default)]
    pub solve_mode: CcdSolveMode,

    /// Tip-to-target distance reported as converged.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,

    #[serde(default)]
    pub joints: Vec<CcdJoint2D>,
}

const fn default_tolerance() -> f32 {
    0.01
}

impl Default for CcdIk2DConfig {
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

impl CcdIk2DConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_tolerance(self.tolerance)
    }
}

/// Rotates each joint so the joint-to-tip direction lines up with the
/// joint-to-target direction, one sweep per run.
#[derive(Debug, Clone)]
pub struct CcdIk2D {
    config: CcdIk2DConfig,
}

impl CcdIk2D {
    pub fn new(config: CcdIk2DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &CcdIk2DConfig {
        &self.config
    }

    pub fn set_joint_count(&mut self, count: usize) {
        resize_joints(&mut self.config.joints, count);
    }

    fn tip(&self, ctx: &ModifierContext<'_, Transform2>) -> Result<Vector2<f32>, SolveError> {
        Ok(ctx
            .resolve_pose(self.config.tip.as_ref(), SolveError::MissingTip)?
            .origin)
    }

    /// One joint step. Returns `false` when the step was skipped.
    fn step(
        &self,
        ctx: &mut ModifierContext<'_, Transform2>,
        index: usize,
        target: Vector2<f32>,
    ) -> Result<bool, SolveError> {
        let joint = &self.config.joints[index];
        let bone = joint_bone(index, joint.bone)?;
        let pose = ctx.pose(bone)?;
        let to_tip = self.tip(ctx)? - pose.origin;
        let to_target = target - pose.origin;
        if to_tip.norm_squared() <= f32::EPSILON || to_target.norm_squared() <= f32::EPSILON {
            debug!("tendon-ik: ccd_2d joint {index} sits on the tip or target");
            return Ok(false);
        }
        let angle = to_target.y.atan2(to_target.x) - to_tip.y.atan2(to_tip.x);
        let rotated = constrain(ctx, bone, pose.rotated_local(angle), &joint.constraint)?;
        ctx.set_pose(bone, rotated)
    }
}

impl Modifier<Transform2> for CcdIk2D {
    type Config = CcdIk2DConfig;

    fn name(&self) -> &str {
        "ccd_2d"
    }

    fn configure(&mut self, config: CcdIk2DConfig) -> Result<(), ConfigError> {
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

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_4;

    use approx::assert_relative_eq;
    use tendon_core::scene::SceneGraph;
    use tendon_core::skeleton::Skeleton2D;
    use tendon_core::transform::Affine;

    use super::*;

    /// Two unit bones along +X with a tip marker at (2, 0).
    fn rig(target: Vector2<f32>) -> (Skeleton2D, SceneGraph<Transform2>, [BoneId; 3]) {
        let mut skeleton = Skeleton2D::default();
        let b0 = skeleton.add_bone("b0", None, Transform2::identity()).unwrap();
        let b1 = skeleton
            .add_bone("b1", Some(b0), Transform2::from_translation(Vector2::new(1.0, 0.0)))
            .unwrap();
        let tip = skeleton
            .add_bone("tip", Some(b1), Transform2::from_translation(Vector2::new(1.0, 0.0)))
            .unwrap();
        let mut scene = SceneGraph::new();
        scene.insert("target", Transform2::from_translation(target));
        (skeleton, scene, [b0, b1, tip])
    }

    fn config(bones: &[BoneId; 3], mode: CcdSolveMode) -> CcdIk2DConfig {
        CcdIk2DConfig {
            target: Some(NodeRef::from("target")),
            tip: Some(NodeRef::Bone(bones[2])),
            solve_mode: mode,
            joints: vec![CcdJoint2D::new(bones[0]), CcdJoint2D::new(bones[1])],
            ..CcdIk2DConfig::default()
        }
    }

    #[test]
    fn backward_sweep_reaches_target() {
        let target = Vector2::new(1.0, 1.0);
        let (mut skeleton, mut scene, bones) = rig(target);
        let mut modifier = CcdIk2D::new(config(&bones, CcdSolveMode::Backward)).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let outcome = modifier.execute(&mut ctx).unwrap();
        assert!(outcome.converged, "{outcome:?}");
        assert_relative_eq!(
            skeleton.world_transform(bones[2]).unwrap().origin,
            target,
            epsilon = 1e-5
        );
    }

    #[test]
    fn forward_sweep_turns_root_first() {
        let (mut skeleton, mut scene, bones) = rig(Vector2::new(1.0, 1.0));
        let mut modifier = CcdIk2D::new(config(&bones, CcdSolveMode::Forward)).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let outcome = modifier.execute(&mut ctx).unwrap();
        assert!(!outcome.converged);
        assert_relative_eq!(
            skeleton.world_transform(bones[0]).unwrap().rotation(),
            FRAC_PI_4,
            epsilon = 1e-5
        );
        assert_relative_eq!(outcome.residual, 2f32.sqrt() * (2f32.sqrt() - 1.0), epsilon = 1e-4);
    }

    #[test]
    fn constraint_limits_the_step() {
        let (mut skeleton, mut scene, bones) = rig(Vector2::new(1.0, 1.0));
        let mut config = config(&bones, CcdSolveMode::Backward);
        config.joints[1].constraint = AngleConstraint::new(0.0, 0.5);
        let mut modifier = CcdIk2D::new(config).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        modifier.execute(&mut ctx).unwrap();
        assert_relative_eq!(
            skeleton.local_transform(bones[1]).unwrap().rotation(),
            0.5,
            epsilon = 1e-5
        );
    }

    #[test]
    fn tip_is_required() {
        let (mut skeleton, mut scene, bones) = rig(Vector2::new(1.0, 1.0));
        let mut modifier = CcdIk2D::new(CcdIk2DConfig {
            tip: None,
            ..config(&bones, CcdSolveMode::Forward)
        })
        .unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        assert_eq!(modifier.execute(&mut ctx), Err(SolveError::MissingTip));
    }

    #[test]
    fn joint_on_target_is_skipped() {
        let (mut skeleton, mut scene, bones) = rig(Vector2::new(1.0, 0.0));
        let mut modifier = CcdIk2D::new(config(&bones, CcdSolveMode::Backward)).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let outcome = modifier.execute(&mut ctx).unwrap();
        assert_eq!(outcome.skipped_joints, 1);
        assert!(skeleton.world_transform(bones[1]).unwrap().is_finite());
    }
}
