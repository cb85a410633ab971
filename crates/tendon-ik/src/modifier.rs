//! The capability every solver implements, and what it runs against.
//!
//! A modifier reads its targets through [`ModifierContext`], does its math
//! in pose space and writes bones back through the skeleton. It never walks
//! the host scene; references are resolved by path or bone id every tick.

use bevy::log::debug;

use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::{self, NodeRef, SceneAccess};
use tendon_core::skeleton::{BoneId, Skeleton};
use tendon_core::transform::Affine;

// ---------------------------------------------------------------------------
// SolveOutcome
// ---------------------------------------------------------------------------

/// What one modifier run achieved.
///
/// Unreachable targets and exhausted iteration budgets are reported here
/// with `converged == false`; they are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SolveOutcome {
    /// Whether the end effector ended within tolerance of the target.
    pub converged: bool,
    /// Iterations spent. Closed-form solvers report 1.
    pub iterations: usize,
    /// Remaining end-effector distance in pose-space units.
    pub residual: f32,
    /// Joints whose update was skipped because of degenerate input.
    pub skipped_joints: usize,
}

impl SolveOutcome {
    /// Single-pass solve that reached its goal.
    pub const fn solved() -> Self {
        Self {
            converged: true,
            iterations: 1,
            residual: 0.0,
            skipped_joints: 0,
        }
    }

    /// Single-pass solve that could only straighten toward the target.
    pub const fn unreachable(residual: f32) -> Self {
        Self {
            converged: false,
            iterations: 1,
            residual,
            skipped_joints: 0,
        }
    }

    #[must_use]
    pub const fn with_skipped(mut self, skipped: usize) -> Self {
        self.skipped_joints = skipped;
        self
    }
}

// ---------------------------------------------------------------------------
// ModifierContext
// ---------------------------------------------------------------------------

/// Everything a modifier may touch during one run.
pub struct ModifierContext<'a, T: Affine> {
    pub skeleton: &'a mut Skeleton<T>,
    pub scene: &'a mut dyn SceneAccess<T>,
    /// Clamped host delta in seconds.
    pub delta: f32,
}

impl<'a, T: Affine> ModifierContext<'a, T> {
    pub fn new(
        skeleton: &'a mut Skeleton<T>,
        scene: &'a mut dyn SceneAccess<T>,
        delta: f32,
    ) -> Self {
        Self {
            skeleton,
            scene,
            delta,
        }
    }

    /// World transform of a configured reference.
    pub fn resolve_world(&self, reference: &NodeRef) -> Result<T, SolveError> {
        scene::resolve_world(reference, self.skeleton, &*self.scene)
    }

    /// Pose-space transform of an optional reference. An unset reference
    /// fails with `missing`.
    pub fn resolve_pose(
        &self,
        reference: Option<&NodeRef>,
        missing: SolveError,
    ) -> Result<T, SolveError> {
        let world = self.resolve_world(reference.ok_or(missing)?)?;
        Ok(self.skeleton.pose_space().to_pose(&world))
    }

    pub fn pose(&self, bone: BoneId) -> Result<T, SolveError> {
        Ok(self.skeleton.global_pose(bone)?)
    }

    /// Reset pose of `bone` relative to the skeleton root.
    pub fn rest_pose(&self, bone: BoneId) -> Result<T, SolveError> {
        Ok(self.skeleton.rest_global_pose(bone)?)
    }

    /// Bone length in pose units. Unset lengths fail with
    /// [`SolveError::UnsetLength`].
    pub fn pose_length(&self, joint: usize, bone: BoneId) -> Result<f32, SolveError> {
        if !self.skeleton.bone(bone)?.has_length() {
            return Err(SolveError::UnsetLength { joint });
        }
        Ok(self.skeleton.pose_length(bone)?)
    }

    /// Write a pose-space transform back to a bone.
    ///
    /// Returns `Ok(false)` without touching the bone when `pose` holds a
    /// NaN or infinite component.
    pub fn set_pose(&mut self, bone: BoneId, pose: T) -> Result<bool, SolveError> {
        if !pose.is_finite() {
            debug!("tendon-ik: skipping non-finite pose for {bone}");
            return Ok(false);
        }
        self.notify(bone)?;
        self.skeleton.set_global_pose(bone, pose)?;
        Ok(true)
    }

    /// Tell the skeleton and the host that `bone` is being driven by IK.
    pub fn notify(&mut self, bone: BoneId) -> Result<(), SolveError> {
        self.skeleton.notify_ik_in_progress(bone, true)?;
        self.scene.notify_ik_in_progress(bone, true);
        Ok(())
    }
}

/// Bone bound to joint `joint`, or [`SolveError::MissingBone`].
pub fn joint_bone(joint: usize, bone: Option<BoneId>) -> Result<BoneId, SolveError> {
    bone.ok_or(SolveError::MissingBone { joint })
}

// ---------------------------------------------------------------------------
// Modifier
// ---------------------------------------------------------------------------

/// A solver that can sit in a [`ModifierStack`](crate::stack::ModifierStack).
pub trait Modifier<T: Affine> {
    /// Typed settings accepted by [`Self::configure`].
    type Config;

    /// Short name used in logs and tick reports.
    fn name(&self) -> &str;

    /// Validate and replace the settings. Runtime state that survives the
    /// change (e.g. Verlet memory) is kept by joint index.
    fn configure(&mut self, config: Self::Config) -> Result<(), ConfigError>;

    /// Run once against the skeleton.
    fn execute(&mut self, ctx: &mut ModifierContext<'_, T>) -> Result<SolveOutcome, SolveError>;
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::Vector2;
    use tendon_core::scene::SceneGraph;
    use tendon_core::skeleton::Skeleton2D;
    use tendon_core::transform::Transform2;

    use super::*;

    fn rig() -> (Skeleton2D, SceneGraph<Transform2>, BoneId) {
        let root = Transform2::from_translation(Vector2::new(10.0, 0.0));
        let mut skeleton = Skeleton2D::new(root).unwrap();
        let bone = skeleton.add_bone("b", None, Transform2::identity()).unwrap();
        let mut scene = SceneGraph::new();
        scene.insert("target", Transform2::from_translation(Vector2::new(12.0, 1.0)));
        (skeleton, scene, bone)
    }

    #[test]
    fn resolve_pose_is_root_relative() {
        let (mut skeleton, mut scene, _) = rig();
        let ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let target = ctx
            .resolve_pose(Some(&NodeRef::from("target")), SolveError::MissingTarget)
            .unwrap();
        assert_relative_eq!(target.origin, Vector2::new(2.0, 1.0));
    }

    #[test]
    fn resolve_pose_reports_missing() {
        let (mut skeleton, mut scene, _) = rig();
        let ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        assert_eq!(
            ctx.resolve_pose(None, SolveError::MissingTarget),
            Err(SolveError::MissingTarget)
        );
        assert_eq!(
            ctx.resolve_pose(Some(&NodeRef::from("nope")), SolveError::MissingTarget),
            Err(SolveError::MissingReference("nope".into()))
        );
    }

    #[test]
    fn set_pose_notifies_and_writes() {
        let (mut skeleton, mut scene, bone) = rig();
        {
            let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
            let pose = Transform2::from_translation(Vector2::new(1.0, 0.0));
            assert!(ctx.set_pose(bone, pose).unwrap());
        }
        assert!(skeleton.bone(bone).unwrap().is_ik_in_progress());
        assert_eq!(scene.ik_hint(bone), Some(true));
        assert_relative_eq!(
            skeleton.world_transform(bone).unwrap().origin,
            Vector2::new(11.0, 0.0)
        );
    }

    #[test]
    fn set_pose_rejects_nan() {
        let (mut skeleton, mut scene, bone) = rig();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let pose = Transform2::from_translation(Vector2::new(f32::NAN, 0.0));
        assert!(!ctx.set_pose(bone, pose).unwrap());
        assert!(!ctx.skeleton.bone(bone).unwrap().is_ik_in_progress());
    }

    #[test]
    fn pose_length_requires_a_length() {
        let (mut skeleton, mut scene, bone) = rig();
        let ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        assert_eq!(
            ctx.pose_length(0, bone),
            Err(SolveError::UnsetLength { joint: 0 })
        );
    }

    #[test]
    fn outcome_builders() {
        assert!(SolveOutcome::solved().converged);
        let o = SolveOutcome::unreachable(2.0).with_skipped(1);
        assert!(!o.converged);
        assert_eq!(o.skipped_joints, 1);
    }
}
