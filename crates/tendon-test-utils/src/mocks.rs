//! Mock modifiers for stack and plugin tests.
//!
//! They implement [`Modifier`] for any transform type, so the same mock
//! works in a 2D and a 3D stack.

use tendon_core::error::{ConfigError, SolveError};
use tendon_core::skeleton::BoneId;
use tendon_core::transform::Affine;
use tendon_ik::modifier::{Modifier, ModifierContext, SolveOutcome};

// ---------------------------------------------------------------------------
// RecordingModifier
// ---------------------------------------------------------------------------

/// Counts runs and remembers the deltas it saw. Never touches bones.
#[derive(Debug, Clone)]
pub struct RecordingModifier {
    label: &'static str,
    outcome: Result<SolveOutcome, SolveError>,
    deltas: Vec<f32>,
}

impl RecordingModifier {
    /// A recorder that reports [`SolveOutcome::solved`].
    pub const fn new(label: &'static str) -> Self {
        Self {
            label,
            outcome: Ok(SolveOutcome::solved()),
            deltas: Vec::new(),
        }
    }

    /// A recorder that fails every run with `error`.
    pub const fn failing(label: &'static str, error: SolveError) -> Self {
        Self {
            label,
            outcome: Err(error),
            deltas: Vec::new(),
        }
    }

    pub fn runs(&self) -> usize {
        self.deltas.len()
    }

    pub fn deltas(&self) -> &[f32] {
        &self.deltas
    }
}

impl<T: Affine> Modifier<T> for RecordingModifier {
    /// Replaces the reported outcome.
    type Config = Result<SolveOutcome, SolveError>;

    fn name(&self) -> &str {
        self.label
    }

    fn configure(&mut self, outcome: Self::Config) -> Result<(), ConfigError> {
        self.outcome = outcome;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ModifierContext<'_, T>) -> Result<SolveOutcome, SolveError> {
        self.deltas.push(ctx.delta);
        self.outcome.clone()
    }
}

// ---------------------------------------------------------------------------
// PinModifier
// ---------------------------------------------------------------------------

/// Writes a fixed pose-space transform to one bone every run.
#[derive(Debug, Clone)]
pub struct PinModifier<T: Affine> {
    bone: BoneId,
    pose: T,
}

impl<T: Affine> PinModifier<T> {
    pub const fn new(bone: BoneId, pose: T) -> Self {
        Self {
            bone,
            pose,
        }
    }
}

impl<T: Affine> Modifier<T> for PinModifier<T> {
    type Config = T;

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "pin"
    }

    fn configure(&mut self, pose: T) -> Result<(), ConfigError> {
        self.pose = pose;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ModifierContext<'_, T>) -> Result<SolveOutcome, SolveError> {
        let written = ctx.set_pose(self.bone, self.pose)?;
        Ok(SolveOutcome::solved().with_skipped(usize::from(!written)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use nalgebra::Vector2;
    use tendon_core::config::{Phase, StackConfig};
    use tendon_core::transform::Transform2;
    use tendon_ik::{ModifierStack, TickStatus};

    use super::*;
    use crate::rig::chain_2d;

    fn config() -> StackConfig {
        StackConfig {
            skip_first_visual_tick: false,
            ..StackConfig::default()
        }
    }

    #[test]
    fn recorder_sees_each_tick() {
        let mut rig = chain_2d(&[1.0]);
        let mut stack = ModifierStack::new(config());
        stack.push(RecordingModifier::new("rec"), Phase::Visual);

        stack.tick(Phase::Visual, 0.02, &mut rig.skeleton, &mut rig.scene);
        stack.tick(Phase::Visual, 0.03, &mut rig.skeleton, &mut rig.scene);
        stack.tick(Phase::Physics, 0.04, &mut rig.skeleton, &mut rig.scene);

        let recorder = &stack.get(0).unwrap().modifier;
        assert_eq!(recorder.runs(), 2);
        assert_eq!(recorder.deltas(), &[0.02, 0.03]);
    }

    #[test]
    fn failing_recorder_is_reported() {
        let mut rig = chain_2d(&[1.0]);
        let mut stack = ModifierStack::new(config());
        stack.push(
            RecordingModifier::failing("broken", SolveError::MissingTarget),
            Phase::Visual,
        );

        let report = stack.tick(Phase::Visual, 0.016, &mut rig.skeleton, &mut rig.scene);
        assert_eq!(report.status, TickStatus::Ran);
        assert!(!report.all_ok());
        assert_eq!(report.errors().count(), 1);
    }

    #[test]
    fn pin_writes_the_pose() {
        let mut rig = chain_2d(&[1.0]);
        let bone = rig.bones[0];
        let mut pin = PinModifier::new(bone, Transform2::from_translation(Vector2::new(0.0, 2.0)));
        let outcome = pin.execute(&mut rig.context(0.016)).unwrap();
        assert_eq!(outcome.skipped_joints, 0);
        assert!((rig.tip() - Vector2::new(1.0, 2.0)).norm() < 1e-6);
    }
}
