//! Point one 3D bone at a target.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::skeleton::BoneId;
use tendon_core::transform::{BasisAxis, Transform3};

use super::{look_at, up_hint, validate_euler, with_rest_scale};
use crate::modifier::{Modifier, ModifierContext, SolveOutcome};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LookAt3DConfig {
    #[serde(default)]
    pub bone: Option<BoneId>,

    #[serde(default)]
    pub target: Option<NodeRef>,

    /// Local Euler angles (X, then Y, then Z) added after aiming.
    #[serde(default)]
    pub additional_rotation: Vector3<f32>,

    /// Reset-pose axis used to fix the roll.
    #[serde(default)]
    pub up_axis: BasisAxis,
}

impl LookAt3DConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_euler("additional_rotation", &self.additional_rotation)
    }
}

#[derive(Debug, Clone)]
pub struct LookAt3D {
    config: LookAt3DConfig,
}

impl LookAt3D {
    pub fn new(config: LookAt3DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &LookAt3DConfig {
        &self.config
    }
}

impl Modifier<Transform3> for LookAt3D {
    type Config = LookAt3DConfig;

    fn name(&self) -> &str {
        "look_at_3d"
    }

    fn configure(&mut self, config: LookAt3DConfig) -> Result<(), ConfigError> {
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
        let bone = self.config.bone.ok_or(SolveError::MissingBone { joint: 0 })?;
        let up = up_hint(ctx, bone, self.config.up_axis)?;

        let pose = ctx.pose(bone)?;
        let Some(aimed) = look_at(&pose, target, up) else {
            return Ok(SolveOutcome::solved().with_skipped(1));
        };
        let aimed = aimed.with_additional_rotation(self.config.additional_rotation);
        if !ctx.set_pose(bone, with_rest_scale(ctx, bone, aimed)?)? {
            return Ok(SolveOutcome::solved().with_skipped(1));
        }
        Ok(SolveOutcome::solved())
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;
    use tendon_core::scene::SceneGraph;
    use tendon_core::skeleton::Skeleton3D;
    use tendon_core::transform::Affine;

    use super::*;

    fn rig(target: Vector3<f32>) -> (Skeleton3D, SceneGraph<Transform3>, BoneId) {
        let mut skeleton = Skeleton3D::default();
        let bone = skeleton.add_bone("head", None, Transform3::identity()).unwrap();
        let mut scene = SceneGraph::new();
        scene.insert("target", Transform3::from_translation(target));
        (skeleton, scene, bone)
    }

    fn config(bone: BoneId) -> LookAt3DConfig {
        LookAt3DConfig {
            bone: Some(bone),
            target: Some(NodeRef::from("target")),
            ..LookAt3DConfig::default()
        }
    }

    #[test]
    fn forward_points_at_target() {
        let (mut skeleton, mut scene, bone) = rig(Vector3::new(3.0, 0.0, 0.0));
        let mut modifier = LookAt3D::new(config(bone)).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        assert!(modifier.execute(&mut ctx).unwrap().converged);

        let pose = skeleton.world_transform(bone).unwrap();
        assert_relative_eq!(pose.forward(), Vector3::x(), epsilon = 1e-5);
        // Roll comes from the reset pose Y axis.
        assert_relative_eq!(pose.axis(BasisAxis::Y), Vector3::y(), epsilon = 1e-5);
    }

    #[test]
    fn additional_rotation_rolls_the_bone() {
        let (mut skeleton, mut scene, bone) = rig(Vector3::new(0.0, 0.0, -3.0));
        let mut modifier = LookAt3D::new(LookAt3DConfig {
            additional_rotation: Vector3::new(0.0, 0.0, FRAC_PI_2),
            ..config(bone)
        })
        .unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        modifier.execute(&mut ctx).unwrap();

        let pose = skeleton.world_transform(bone).unwrap();
        assert_relative_eq!(pose.forward(), -Vector3::z(), epsilon = 1e-5);
        assert_relative_eq!(pose.axis(BasisAxis::X), Vector3::y(), epsilon = 1e-5);
    }

    #[test]
    fn rest_scale_is_kept() {
        let (mut skeleton, mut scene, bone) = rig(Vector3::new(0.0, 4.0, -4.0));
        let scaled = Transform3::from_parts(
            UnitQuaternion::identity(),
            Vector3::repeat(2.0),
            Vector3::zeros(),
        );
        skeleton.set_rest(bone, scaled).unwrap();
        let mut modifier = LookAt3D::new(config(bone)).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        modifier.execute(&mut ctx).unwrap();
        assert_relative_eq!(
            skeleton.world_transform(bone).unwrap().scale(),
            Vector3::repeat(2.0),
            epsilon = 1e-5
        );
    }

    #[test]
    fn target_on_origin_is_skipped() {
        let (mut skeleton, mut scene, bone) = rig(Vector3::zeros());
        let mut modifier = LookAt3D::new(config(bone)).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let outcome = modifier.execute(&mut ctx).unwrap();
        assert_eq!(outcome.skipped_joints, 1);
        assert!(skeleton.world_transform(bone).unwrap().approx_eq(&Transform3::identity(), 1e-6));
    }

    #[test]
    fn missing_target_is_reported() {
        let (mut skeleton, mut scene, bone) = rig(Vector3::zeros());
        let mut modifier = LookAt3D::new(LookAt3DConfig {
            target: None,
            ..config(bone)
        })
        .unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        assert_eq!(modifier.execute(&mut ctx), Err(SolveError::MissingTarget));
    }
}
