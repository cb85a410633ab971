//! Forward-and-backward reaching IK over a 3D chain.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use tendon_core::config::{validate_iterations, validate_tolerance};
use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::skeleton::BoneId;
use tendon_core::transform::{BasisAxis, Transform3};

use super::{bone_tip, look_at, up_hint, validate_euler, with_rest_scale};
use crate::joint::resize_joints;
use crate::modifier::{Modifier, ModifierContext, SolveOutcome, joint_bone};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FabrikJoint3D {
    #[serde(default)]
    pub bone: Option<BoneId>,

    #[serde(default)]
    pub additional_rotation: Vector3<f32>,

    /// Pose-space offset added to the joint before every iteration.
    #[serde(default)]
    pub magnet: Vector3<f32>,

    /// Tip joint only: copy the target's rotation instead of aiming at it.
    #[serde(default)]
    pub use_target_basis: bool,

    #[serde(default)]
    pub up_axis: BasisAxis,
}

impl FabrikJoint3D {
    pub fn new(bone: BoneId) -> Self {
        Self {
            bone: Some(bone),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fabrik3DConfig {
    #[serde(default)]
    pub target: Option<NodeRef>,

    #[serde(default = "default_tolerance")]
    pub tolerance: f32,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Aim with a full look-at that fixes roll from each joint's
    /// `up_axis`. Off by default: bones swing onto their aim point and keep
    /// their current twist.
    #[serde(default)]
    pub use_look_at: bool,

    #[serde(default)]
    pub joints: Vec<FabrikJoint3D>,
}

const fn default_tolerance() -> f32 {
    0.01
}
const fn default_max_iterations() -> usize {
    10
}

impl Default for Fabrik3DConfig {
    fn default() -> Self {
        Self {
            target: None,
            tolerance: default_tolerance(),
            max_iterations: default_max_iterations(),
            use_look_at: false,
            joints: Vec::new(),
        }
    }
}

impl Fabrik3DConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_tolerance(self.tolerance)?;
        validate_iterations(self.max_iterations)?;
        for (index, joint) in self.joints.iter().enumerate() {
            validate_euler(&format!("joints[{index}].additional_rotation"), &joint.additional_rotation)?;
            validate_euler(&format!("joints[{index}].magnet"), &joint.magnet)?;
        }
        Ok(())
    }
}

/// Joint positions plus what is needed to turn them back into poses.
struct Chain {
    bones: Vec<BoneId>,
    lengths: Vec<f32>,
    ups: Vec<Vector3<f32>>,
    positions: Vec<Vector3<f32>>,
    skipped: usize,
}

impl Chain {
    fn tip(&self) -> usize {
        self.bones.len() - 1
    }
}

fn reach(anchor: Vector3<f32>, moving: Vector3<f32>, length: f32) -> Option<Vector3<f32>> {
    let distance = (moving - anchor).norm();
    (distance > f32::EPSILON).then(|| anchor.lerp(&moving, length / distance))
}

#[derive(Debug, Clone)]
pub struct Fabrik3D {
    config: Fabrik3DConfig,
}

impl Fabrik3D {
    pub fn new(config: Fabrik3DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &Fabrik3DConfig {
        &self.config
    }

    pub fn set_joint_count(&mut self, count: usize) {
        resize_joints(&mut self.config.joints, count);
    }

    fn gather(&self, ctx: &ModifierContext<'_, Transform3>) -> Result<Chain, SolveError> {
        let mut chain = Chain {
            bones: Vec::new(),
            lengths: Vec::new(),
            ups: Vec::new(),
            positions: Vec::new(),
            skipped: 0,
        };
        for (index, joint) in self.config.joints.iter().enumerate() {
            let bone = joint_bone(index, joint.bone)?;
            chain.lengths.push(ctx.pose_length(index, bone)?);
            chain.ups.push(up_hint(ctx, bone, joint.up_axis)?);
            chain.positions.push(ctx.pose(bone)?.origin);
            chain.bones.push(bone);
        }
        if chain.bones.is_empty() {
            return Err(SolveError::NoJoints);
        }
        Ok(chain)
    }

    fn end_effector(
        ctx: &ModifierContext<'_, Transform3>,
        chain: &Chain,
    ) -> Result<Vector3<f32>, SolveError> {
        let tip = chain.tip();
        Ok(bone_tip(&ctx.pose(chain.bones[tip])?, chain.lengths[tip]))
    }

    fn aim(&self, pose: &Transform3, point: Vector3<f32>, up: Vector3<f32>) -> Option<Transform3> {
        if self.config.use_look_at {
            look_at(pose, point, up)
        } else {
            pose.swing_looking_at(point)
        }
    }

    /// Write the solved positions back as poses, each bone aimed at the
    /// next joint and the tip at the target.
    fn apply(
        &self,
        ctx: &mut ModifierContext<'_, Transform3>,
        chain: &mut Chain,
        target: &Transform3,
    ) -> Result<(), SolveError> {
        let tip = chain.tip();
        for index in 0..=tip {
            let joint = &self.config.joints[index];
            let bone = chain.bones[index];
            let mut pose = ctx.pose(bone)?;
            pose.origin = chain.positions[index];

            let aimed = if index == tip && joint.use_target_basis {
                Some(pose.with_rotation(target.rotation_quat()))
            } else {
                let point = chain.positions.get(index + 1).copied().unwrap_or(target.origin);
                self.aim(&pose, point, chain.ups[index])
            };
            let pose = match aimed {
                Some(aimed) => aimed.with_additional_rotation(joint.additional_rotation),
                None => {
                    chain.skipped += 1;
                    pose
                }
            };
            if !ctx.set_pose(bone, with_rest_scale(ctx, bone, pose)?)? {
                chain.skipped += 1;
            }
            chain.positions[index] = ctx.pose(bone)?.origin;
        }
        Ok(())
    }
}

impl Modifier<Transform3> for Fabrik3D {
    type Config = Fabrik3DConfig;

    fn name(&self) -> &str {
        "fabrik_3d"
    }

    fn configure(&mut self, config: Fabrik3DConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut ModifierContext<'_, Transform3>,
    ) -> Result<SolveOutcome, SolveError> {
        let target = ctx.resolve_pose(self.config.target.as_ref(), SolveError::MissingTarget)?;
        let mut chain = self.gather(ctx)?;
        let root = chain.positions[0];
        let tip = chain.tip();

        let mut residual = (Self::end_effector(ctx, &chain)? - target.origin).norm();
        let mut iterations = 0;
        while residual > self.config.tolerance && iterations < self.config.max_iterations {
            for (position, joint) in chain.positions.iter_mut().zip(&self.config.joints) {
                *position += joint.magnet;
            }

            let heading = ctx.pose(chain.bones[tip])?.forward();
            chain.positions[tip] = target.origin - heading * chain.lengths[tip];
            for index in (1..=tip).rev() {
                match reach(chain.positions[index], chain.positions[index - 1], chain.lengths[index - 1]) {
                    Some(position) => chain.positions[index - 1] = position,
                    None => chain.skipped += 1,
                }
            }

            chain.positions[0] = root;
            for index in 0..tip {
                match reach(chain.positions[index], chain.positions[index + 1], chain.lengths[index]) {
                    Some(position) => chain.positions[index + 1] = position,
                    None => chain.skipped += 1,
                }
            }

            self.apply(ctx, &mut chain, &target)?;
            residual = (Self::end_effector(ctx, &chain)? - target.origin).norm();
            iterations += 1;
        }

        Ok(SolveOutcome {
            converged: residual <= self.config.tolerance,
            iterations,
            residual,
            skipped_joints: chain.skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;
    use tendon_core::scene::SceneGraph;
    use tendon_core::skeleton::Skeleton3D;
    use tendon_core::transform::Affine;

    use super::*;

    /// Three unit bones along -Z plus an end marker.
    fn chain(target: Vector3<f32>) -> (Skeleton3D, SceneGraph<Transform3>, Vec<BoneId>) {
        let mut skeleton = Skeleton3D::default();
        let mut bones = Vec::new();
        let mut parent = None;
        for (i, name) in ["b0", "b1", "b2", "end"].into_iter().enumerate() {
            let offset = if i == 0 { 0.0 } else { -1.0 };
            let id = skeleton
                .add_bone(name, parent, Transform3::from_translation(Vector3::new(0.0, 0.0, offset)))
                .unwrap();
            bones.push(id);
            parent = Some(id);
        }
        skeleton.auto_setup();
        let mut scene = SceneGraph::new();
        scene.insert("target", Transform3::from_translation(target));
        (skeleton, scene, bones)
    }

    fn config(bones: &[BoneId]) -> Fabrik3DConfig {
        Fabrik3DConfig {
            target: Some(NodeRef::from("target")),
            joints: bones[..3].iter().copied().map(FabrikJoint3D::new).collect(),
            ..Fabrik3DConfig::default()
        }
    }

    #[test]
    fn converges_on_reachable_target() {
        let target = Vector3::new(1.5, 0.5, -1.5);
        let (mut skeleton, mut scene, bones) = chain(target);
        let mut modifier = Fabrik3D::new(Fabrik3DConfig {
            tolerance: 1e-3,
            max_iterations: 50,
            ..config(&bones)
        })
        .unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let outcome = modifier.execute(&mut ctx).unwrap();
        assert!(outcome.converged, "{outcome:?}");
        assert_relative_eq!(
            skeleton.world_transform(bones[3]).unwrap().origin,
            target,
            epsilon = 1e-2
        );
        for pair in bones.windows(2) {
            let a = skeleton.world_transform(pair[0]).unwrap().origin;
            let b = skeleton.world_transform(pair[1]).unwrap().origin;
            assert_relative_eq!((b - a).norm(), 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn look_at_mode_also_converges() {
        let target = Vector3::new(0.0, 1.5, -1.5);
        let (mut skeleton, mut scene, bones) = chain(target);
        let mut modifier = Fabrik3D::new(Fabrik3DConfig {
            use_look_at: true,
            tolerance: 1e-3,
            max_iterations: 50,
            ..config(&bones)
        })
        .unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        assert!(modifier.execute(&mut ctx).unwrap().converged);
        assert!(skeleton.world_transform(bones[2]).unwrap().is_finite());
    }

    #[test]
    fn unreachable_target_straightens() {
        let (mut skeleton, mut scene, bones) = chain(Vector3::new(0.0, 10.0, 0.0));
        let mut modifier = Fabrik3D::new(config(&bones)).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let outcome = modifier.execute(&mut ctx).unwrap();
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 10);
        assert_relative_eq!(outcome.residual, 7.0, epsilon = 0.05);
        assert_relative_eq!(
            skeleton.world_transform(bones[3]).unwrap().origin,
            Vector3::new(0.0, 3.0, 0.0),
            epsilon = 0.05
        );
    }

    #[test]
    fn target_at_rest_does_no_work() {
        let (mut skeleton, mut scene, bones) = chain(Vector3::new(0.0, 0.0, -3.0));
        let mut modifier = Fabrik3D::new(config(&bones)).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let outcome = modifier.execute(&mut ctx).unwrap();
        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 0);
    }

    #[test]
    fn tip_can_copy_target_basis() {
        let (mut skeleton, mut scene, bones) = chain(Vector3::zeros());
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.6);
        scene.insert("target", Transform3::from_rotation(rotation, Vector3::new(1.0, 0.0, -2.0)));
        let mut config = config(&bones);
        config.joints[2].use_target_basis = true;
        let mut modifier = Fabrik3D::new(config).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        modifier.execute(&mut ctx).unwrap();
        let tip = skeleton.world_transform(bones[2]).unwrap().rotation_quat();
        assert_relative_eq!(tip.angle_to(&rotation), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn chain_errors() {
        let (mut skeleton, mut scene, bones) = chain(Vector3::new(1.0, 0.0, -1.0));
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);

        let mut empty = Fabrik3D::new(Fabrik3DConfig {
            joints: Vec::new(),
            ..config(&bones)
        })
        .unwrap();
        assert_eq!(empty.execute(&mut ctx), Err(SolveError::NoJoints));

        let mut unbound = Fabrik3D::new(config(&bones)).unwrap();
        unbound.set_joint_count(4);
        assert_eq!(
            unbound.execute(&mut ctx),
            Err(SolveError::MissingBone { joint: 3 })
        );
    }

    #[test]
    fn rejects_non_finite_magnet() {
        let mut joint = FabrikJoint3D::default();
        joint.magnet.x = f32::NAN;
        assert!(matches!(
            Fabrik3D::new(Fabrik3DConfig {
                joints: vec![joint],
                ..Fabrik3DConfig::default()
            }),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
