//! Forward-and-backward reaching IK over a 2D chain.
//!
//! Joint positions are solved on a pose-space snapshot of the chain; each
//! iteration then aims every bone at the next joint and writes it back.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use tendon_core::config::{validate_iterations, validate_tolerance};
use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::skeleton::BoneId;
use tendon_core::transform::Transform2;

use super::{aim, bone_end};
use crate::joint::resize_joints;
use crate::modifier::{Modifier, ModifierContext, SolveOutcome, joint_bone};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabrikJoint2D {
    #[serde(default)]
    pub bone: Option<BoneId>,

    #[serde(default)]
    pub additional_rotation: f32,

    /// Pose-space offset added to the joint before every iteration. Biases
    /// which way the chain bends.
    #[serde(default = "Vector2::zeros")]
    pub magnet: Vector2<f32>,

    /// Tip joint only: copy the target's rotation instead of aiming at it.
    #[serde(default)]
    pub use_target_rotation: bool,
}

impl Default for FabrikJoint2D {
    fn default() -> Self {
        Self {
            bone: None,
            additional_rotation: 0.0,
            magnet: Vector2::zeros(),
            use_target_rotation: false,
        }
    }
}

impl FabrikJoint2D {
    pub fn new(bone: BoneId) -> Self {
        Self {
            bone: Some(bone),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fabrik2DConfig {
    #[serde(default)]
    pub target: Option<NodeRef>,

    /// Stop once the end effector is this close to the target.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default)]
    pub joints: Vec<FabrikJoint2D>,
}

const fn default_tolerance() -> f32 {
    0.01
}
const fn default_max_iterations() -> usize {
    10
}

impl Default for Fabrik2DConfig {
    fn default() -> Self {
        Self {
            target: None,
            tolerance: default_tolerance(),
            max_iterations: default_max_iterations(),
            joints: Vec::new(),
        }
    }
}

impl Fabrik2DConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_tolerance(self.tolerance)?;
        validate_iterations(self.max_iterations)?;
        validate_joints(&self.joints)
    }
}

pub(crate) fn validate_joints(joints: &[FabrikJoint2D]) -> Result<(), ConfigError> {
    for (index, joint) in joints.iter().enumerate() {
        if !(joint.additional_rotation.is_finite() && joint.magnet.iter().all(|v| v.is_finite())) {
            return Err(ConfigError::InvalidValue {
                field: format!("joints[{index}]"),
                message: "rotation and magnet must be finite".into(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Chain snapshot
// ---------------------------------------------------------------------------

/// Pose-space working copy of a chain, shared by both FABRIK variants.
#[derive(Debug, Clone)]
pub(crate) struct FabrikChain {
    pub bones: Vec<BoneId>,
    pub lengths: Vec<f32>,
    pub rest_angles: Vec<f32>,
    pub poses: Vec<Transform2>,
    /// Joint updates dropped because two joints coincided.
    pub skipped: usize,
}

impl FabrikChain {
    pub fn gather(
        ctx: &ModifierContext<'_, Transform2>,
        bones: impl IntoIterator<Item = Option<BoneId>>,
    ) -> Result<Self, SolveError> {
        let mut chain = Self {
            bones: Vec::new(),
            lengths: Vec::new(),
            rest_angles: Vec::new(),
            poses: Vec::new(),
            skipped: 0,
        };
        for (joint, bone) in bones.into_iter().enumerate() {
            let bone = joint_bone(joint, bone)?;
            chain.lengths.push(ctx.pose_length(joint, bone)?);
            chain.rest_angles.push(ctx.skeleton.bone(bone)?.rest_angle());
            chain.poses.push(ctx.pose(bone)?);
            chain.bones.push(bone);
        }
        if chain.bones.is_empty() {
            return Err(SolveError::NoJoints);
        }
        Ok(chain)
    }

    pub fn tip(&self) -> usize {
        self.bones.len() - 1
    }

    /// Where the tip bone ends.
    pub fn end_effector(&self) -> Vector2<f32> {
        let tip = self.tip();
        bone_end(&self.poses[tip], self.rest_angles[tip], self.lengths[tip])
    }

    /// Point joint `index` should aim at: the next joint, or the target.
    pub fn aim_point(&self, index: usize, target: Vector2<f32>) -> Vector2<f32> {
        self.poses.get(index + 1).map_or(target, |next| next.origin)
    }

    /// Move the tip so its end lands on `target`, keeping its heading.
    pub fn place_tip(&mut self, target: Vector2<f32>) {
        let tip = self.tip();
        let heading = self.poses[tip].heading(self.rest_angles[tip]);
        self.poses[tip].origin = target - heading * self.lengths[tip];
    }

    /// Backward step: drag joint `index - 1` to bone length from `index`.
    pub fn pull_toward_tip(&mut self, index: usize) {
        let anchor = self.poses[index].origin;
        let length = self.lengths[index - 1];
        match reach(anchor, self.poses[index - 1].origin, length) {
            Some(origin) => self.poses[index - 1].origin = origin,
            None => self.skipped += 1,
        }
    }

    /// Forward step: drag joint `index + 1` to bone length from `index`.
    pub fn pull_toward_root(&mut self, index: usize) {
        let anchor = self.poses[index].origin;
        let length = self.lengths[index];
        match reach(anchor, self.poses[index + 1].origin, length) {
            Some(origin) => self.poses[index + 1].origin = origin,
            None => self.skipped += 1,
        }
    }
}

/// Point `length` away from `anchor` on the line toward `moving`.
fn reach(anchor: Vector2<f32>, moving: Vector2<f32>, length: f32) -> Option<Vector2<f32>> {
    let distance = (moving - anchor).norm();
    if distance <= f32::EPSILON {
        return None;
    }
    Some(anchor.lerp(&moving, length / distance))
}

/// Aim joint `index` of `chain` and return the pose to write. Falls back to
/// the unrotated pose (and counts a skip) when the aim point is degenerate.
pub(crate) fn aimed_pose(
    chain: &mut FabrikChain,
    joints: &[FabrikJoint2D],
    index: usize,
    target: &Transform2,
) -> Transform2 {
    let joint = &joints[index];
    let pose = chain.poses[index];
    let rest = chain.rest_angles[index];
    if index == chain.tip() && joint.use_target_rotation {
        return pose
            .with_rotation(target.rotation())
            .rotated(joint.additional_rotation - rest);
    }
    let point = chain.aim_point(index, target.origin);
    aim(&pose, point, joint.additional_rotation, rest).unwrap_or_else(|| {
        chain.skipped += 1;
        pose
    })
}

// ---------------------------------------------------------------------------
// Fabrik2D
// ---------------------------------------------------------------------------

/// Unconstrained FABRIK. Converges when the tip's end is within
/// `tolerance` of the target, or stops after `max_iterations`.
///
/// Both passes only slide joints along the lines between them, so a straight
/// chain whose target lies on its own line (closer than full reach) can never
/// bend and stops with the leftover distance as its residual. Give one of the
/// middle joints a `magnet` to pick a bend direction in that case.
#[derive(Debug, Clone)]
pub struct Fabrik2D {
    config: Fabrik2DConfig,
}

impl Fabrik2D {
    pub fn new(config: Fabrik2DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &Fabrik2DConfig {
        &self.config
    }

    pub fn set_joint_count(&mut self, count: usize) {
        resize_joints(&mut self.config.joints, count);
    }

    fn apply(
        &self,
        ctx: &mut ModifierContext<'_, Transform2>,
        chain: &mut FabrikChain,
        target: &Transform2,
    ) -> Result<(), SolveError> {
        for index in 0..chain.bones.len() {
            let pose = aimed_pose(chain, &self.config.joints, index, target);
            let bone = chain.bones[index];
            if !ctx.set_pose(bone, pose)? {
                chain.skipped += 1;
            }
            chain.poses[index] = ctx.pose(bone)?;
        }
        Ok(())
    }
}

impl Modifier<Transform2> for Fabrik2D {
    type Config = Fabrik2DConfig;

    fn name(&self) -> &str {
        "fabrik_2d"
    }

    fn configure(&mut self, config: Fabrik2DConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut ModifierContext<'_, Transform2>,
    ) -> Result<SolveOutcome, SolveError> {
        let target = ctx.resolve_pose(self.config.target.as_ref(), SolveError::MissingTarget)?;
        let mut chain = FabrikChain::gather(ctx, self.config.joints.iter().map(|j| j.bone))?;
        let root = chain.poses[0].origin;
        let tip = chain.tip();

        let mut residual = (chain.end_effector() - target.origin).norm();
        let mut iterations = 0;
        while residual > self.config.tolerance && iterations < self.config.max_iterations {
            for (pose, joint) in chain.poses.iter_mut().zip(&self.config.joints) {
                pose.origin += joint.magnet;
            }

            chain.place_tip(target.origin);
            for index in (1..=tip).rev() {
                chain.pull_toward_tip(index);
            }

            chain.poses[0].origin = root;
            for index in 0..tip {
                chain.pull_toward_root(index);
            }

            self.apply(ctx, &mut chain, &target)?;
            residual = (chain.end_effector() - target.origin).norm();
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
    use tendon_core::scene::SceneGraph;
    use tendon_core::skeleton::Skeleton2D;

    use super::*;

    /// Three unit bones along +X plus an end marker.
    fn chain(target: Vector2<f32>) -> (Skeleton2D, SceneGraph<Transform2>, Vec<BoneId>) {
        let mut skeleton = Skeleton2D::default();
        let mut bones = Vec::new();
        let mut parent = None;
        for (i, name) in ["b0", "b1", "b2", "end"].into_iter().enumerate() {
            let offset = if i == 0 { 0.0 } else { 1.0 };
            let id = skeleton
                .add_bone(name, parent, Transform2::from_translation(Vector2::new(offset, 0.0)))
                .unwrap();
            bones.push(id);
            parent = Some(id);
        }
        skeleton.auto_setup();
        let mut scene = SceneGraph::new();
        scene.insert("target", Transform2::from_translation(target));
        (skeleton, scene, bones)
    }

    fn config(bones: &[BoneId]) -> Fabrik2DConfig {
        Fabrik2DConfig {
            target: Some(NodeRef::from("target")),
            joints: bones[..3].iter().copied().map(FabrikJoint2D::new).collect(),
            ..Fabrik2DConfig::default()
        }
    }

    #[test]
    fn converges_on_reachable_target() {
        let target = Vector2::new(1.5, 1.5);
        let (mut skeleton, mut scene, bones) = chain(target);
        let mut modifier = Fabrik2D::new(Fabrik2DConfig {
            tolerance: 1e-3,
            max_iterations: 50,
            ..config(&bones)
        })
        .unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let outcome = modifier.execute(&mut ctx).unwrap();
        assert!(outcome.converged, "{outcome:?}");
        assert!(outcome.residual <= 1e-3);
        assert_relative_eq!(
            skeleton.world_transform(bones[3]).unwrap().origin,
            target,
            epsilon = 1e-2
        );
    }

    #[test]
    fn bone_lengths_are_preserved() {
        let (mut skeleton, mut scene, bones) = chain(Vector2::new(0.5, 2.0));
        let mut modifier = Fabrik2D::new(config(&bones)).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        modifier.execute(&mut ctx).unwrap();
        for pair in bones.windows(2) {
            let a = skeleton.world_transform(pair[0]).unwrap().origin;
            let b = skeleton.world_transform(pair[1]).unwrap().origin;
            assert_relative_eq!((b - a).norm(), 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn unreachable_target_straightens_and_reports() {
        let (mut skeleton, mut scene, bones) = chain(Vector2::new(0.0, 10.0));
        let mut modifier = Fabrik2D::new(config(&bones)).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let outcome = modifier.execute(&mut ctx).unwrap();
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 10);
        assert_relative_eq!(outcome.residual, 7.0, epsilon = 0.05);
        assert_relative_eq!(
            skeleton.world_transform(bones[3]).unwrap().origin,
            Vector2::new(0.0, 3.0),
            epsilon = 0.05
        );
    }

    #[test]
    fn collinear_target_needs_a_magnet_to_bend() {
        let target = Vector2::new(2.5, 0.0);

        let (mut skeleton, mut scene, bones) = chain(target);
        let mut straight = Fabrik2D::new(config(&bones)).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let outcome = straight.execute(&mut ctx).unwrap();
        assert!(!outcome.converged);
        assert_relative_eq!(outcome.residual, 0.5, epsilon = 1e-4);

        let (mut skeleton, mut scene, bones) = chain(target);
        let mut config = config(&bones);
        config.joints[1].magnet = Vector2::new(0.0, 0.5);
        let mut bent = Fabrik2D::new(config).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let outcome = bent.execute(&mut ctx).unwrap();
        assert!(outcome.converged, "{outcome:?}");
        assert_relative_eq!(
            skeleton.world_transform(bones[3]).unwrap().origin,
            target,
            epsilon = 0.02
        );
        assert!(skeleton.world_transform(bones[1]).unwrap().origin.y > 0.1);
    }

    #[test]
    fn target_at_rest_does_no_work() {
        let (mut skeleton, mut scene, bones) = chain(Vector2::new(3.0, 0.0));
        let mut modifier = Fabrik2D::new(config(&bones)).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let outcome = modifier.execute(&mut ctx).unwrap();
        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 0);
        assert!(!skeleton.bone(bones[0]).unwrap().is_ik_in_progress());
    }

    #[test]
    fn tip_can_copy_target_rotation() {
        let mut scene_target = Transform2::from_translation(Vector2::new(2.0, 1.0));
        scene_target = scene_target.with_rotation(0.7);
        let (mut skeleton, mut scene, bones) = chain(Vector2::zeros());
        scene.insert("target", scene_target);
        let mut config = config(&bones);
        config.joints[2].use_target_rotation = true;
        let mut modifier = Fabrik2D::new(config).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        modifier.execute(&mut ctx).unwrap();
        assert_relative_eq!(
            skeleton.world_transform(bones[2]).unwrap().rotation(),
            0.7,
            epsilon = 1e-5
        );
    }

    #[test]
    fn chain_errors() {
        let (mut skeleton, mut scene, bones) = chain(Vector2::new(1.0, 1.0));
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);

        let mut empty = Fabrik2D::new(Fabrik2DConfig {
            joints: Vec::new(),
            ..config(&bones)
        })
        .unwrap();
        assert_eq!(empty.execute(&mut ctx), Err(SolveError::NoJoints));

        let mut unbound = Fabrik2D::new(config(&bones)).unwrap();
        unbound.set_joint_count(4);
        assert_eq!(
            unbound.execute(&mut ctx),
            Err(SolveError::MissingBone { joint: 3 })
        );

        let mut leaf = Fabrik2D::new(config(&bones)).unwrap();
        leaf.config.joints.push(FabrikJoint2D::new(bones[3]));
        assert_eq!(
            leaf.execute(&mut ctx),
            Err(SolveError::UnsetLength { joint: 3 })
        );
    }

    #[test]
    fn rejects_bad_settings() {
        assert!(matches!(
            Fabrik2D::new(Fabrik2DConfig {
                tolerance: 0.0,
                ..Fabrik2DConfig::default()
            }),
            Err(ConfigError::InvalidTolerance(_))
        ));
        assert!(matches!(
            Fabrik2D::new(Fabrik2DConfig {
                max_iterations: 0,
                ..Fabrik2DConfig::default()
            }),
            Err(ConfigError::InvalidIterations)
        ));
    }
}
