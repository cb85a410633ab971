//! Solvers for 2D skeletons.
//!
//! 2D bones point along local +X. A bone's `rest_angle` is the offset
//! between that axis and the direction the bone visually points in; every
//! solver aims the visual direction and then subtracts the rest angle.

pub mod ccdik;
pub mod constrained_fabrik;
pub mod curve;
pub mod duo;
pub mod fabrik;
pub mod lookat;
pub mod slider;
pub mod two_bone;
pub mod velvet;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use tendon_core::angle::AngleConstraint;
use tendon_core::error::{ConfigError, SkeletonError, SolveError};
use tendon_core::skeleton::BoneId;
use tendon_core::transform::{Affine, Transform2};

use crate::modifier::{Modifier, ModifierContext, SolveOutcome};

pub use ccdik::{CcdIk2D, CcdIk2DConfig, CcdJoint2D, CcdSolveMode};
pub use constrained_fabrik::{ConstrainedFabrik2D, ConstrainedFabrik2DConfig};
pub use curve::{CurveIk2D, CurveIk2DConfig, CurveJoint2D};
pub use duo::{DuoIk2D, DuoIk2DConfig};
pub use fabrik::{Fabrik2D, Fabrik2DConfig, FabrikJoint2D};
pub use lookat::{LookAt2D, LookAt2DConfig};
pub use slider::{Slider2D, Slider2DConfig};
pub use two_bone::{TwoBoneIk2D, TwoBoneIk2DConfig};
pub use velvet::{Velvet2D, Velvet2DConfig, VelvetJoint2D, VelvetMode, VelvetState2D};

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Turn `pose` so its visual direction points at `point`, then add
/// `additional` radians. `None` when `point` sits on the bone origin.
pub(crate) fn aim(
    pose: &Transform2,
    point: Vector2<f32>,
    additional: f32,
    rest_angle: f32,
) -> Option<Transform2> {
    Some(pose.looking_at(point)?.rotated(additional - rest_angle))
}

/// End of a bone whose visual direction is `rest_angle` off its +X axis.
pub(crate) fn bone_end(pose: &Transform2, rest_angle: f32, length: f32) -> Vector2<f32> {
    pose.origin + pose.heading(rest_angle) * length
}

/// Pose of the bone's parent frame: the parent bone, or the skeleton root.
pub(crate) fn parent_pose(
    ctx: &ModifierContext<'_, Transform2>,
    bone: BoneId,
) -> Result<Transform2, SolveError> {
    match ctx.skeleton.bone(bone)?.parent() {
        Some(parent) => ctx.pose(parent),
        None => Ok(Transform2::identity()),
    }
}

/// Clamp the rotation of `pose` through `constraint`, measured against the
/// parent frame or against the world depending on the constraint.
pub(crate) fn constrain(
    ctx: &ModifierContext<'_, Transform2>,
    bone: BoneId,
    pose: Transform2,
    constraint: &AngleConstraint,
) -> Result<Transform2, SolveError> {
    if !constraint.enabled {
        return Ok(pose);
    }
    if constraint.in_local_space {
        let parent = parent_pose(ctx, bone)?;
        let inverse = parent
            .try_affine_inverse()
            .ok_or(SkeletonError::SingularTransform(bone))?;
        let local = inverse.compose(&pose);
        let clamped = local.with_rotation(constraint.apply(local.rotation()));
        Ok(parent.compose(&clamped))
    } else {
        let space = ctx.skeleton.pose_space();
        let world = space.to_world(&pose);
        let clamped = world.with_rotation(constraint.apply(world.rotation()));
        Ok(space.to_pose(&clamped))
    }
}

/// Replace the parent-relative origin of `pose`, keeping its rotation.
pub(crate) fn with_local_origin(
    ctx: &ModifierContext<'_, Transform2>,
    bone: BoneId,
    pose: Transform2,
    origin: Vector2<f32>,
) -> Result<Transform2, SolveError> {
    let parent = parent_pose(ctx, bone)?;
    let inverse = parent
        .try_affine_inverse()
        .ok_or(SkeletonError::SingularTransform(bone))?;
    let mut local = inverse.compose(&pose);
    local.origin = origin;
    Ok(parent.compose(&local))
}

/// Law-of-cosines angle opposite `opposite`, or `None` when the ratio is
/// outside `[-1, 1]` by more than rounding error.
pub(crate) fn cosine_angle(adjacent_a: f32, adjacent_b: f32, opposite: f32) -> Option<f32> {
    let denominator = 2.0 * adjacent_a * adjacent_b;
    if denominator.abs() <= f32::EPSILON {
        return None;
    }
    let ratio = (adjacent_a * adjacent_a + adjacent_b * adjacent_b - opposite * opposite)
        / denominator;
    if !(-1.0 - 1e-5..=1.0 + 1e-5).contains(&ratio) {
        return None;
    }
    Some(ratio.clamp(-1.0, 1.0).acos())
}

// ---------------------------------------------------------------------------
// Modifier2D
// ---------------------------------------------------------------------------

/// Settings for any 2D solver, tagged by `kind` in TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Modifier2DConfig {
    LookAt(LookAt2DConfig),
    TwoBone(TwoBoneIk2DConfig),
    Duo(DuoIk2DConfig),
    Fabrik(Fabrik2DConfig),
    ConstrainedFabrik(ConstrainedFabrik2DConfig),
    Ccd(CcdIk2DConfig),
    Curve(CurveIk2DConfig),
    Slider(Slider2DConfig),
    Velvet(Velvet2DConfig),
}

/// One 2D solver of any kind.
#[derive(Debug, Clone)]
pub enum Modifier2D {
    LookAt(LookAt2D),
    TwoBone(TwoBoneIk2D),
    Duo(DuoIk2D),
    Fabrik(Fabrik2D),
    ConstrainedFabrik(ConstrainedFabrik2D),
    Ccd(CcdIk2D),
    Curve(CurveIk2D),
    Slider(Slider2D),
    Velvet(Velvet2D),
}

impl TryFrom<Modifier2DConfig> for Modifier2D {
    type Error = ConfigError;

    fn try_from(config: Modifier2DConfig) -> Result<Self, ConfigError> {
        Ok(match config {
            Modifier2DConfig::LookAt(c) => Self::LookAt(LookAt2D::new(c)?),
            Modifier2DConfig::TwoBone(c) => Self::TwoBone(TwoBoneIk2D::new(c)?),
            Modifier2DConfig::Duo(c) => Self::Duo(DuoIk2D::new(c)?),
            Modifier2DConfig::Fabrik(c) => Self::Fabrik(Fabrik2D::new(c)?),
            Modifier2DConfig::ConstrainedFabrik(c) => {
                Self::ConstrainedFabrik(ConstrainedFabrik2D::new(c)?)
            }
            Modifier2DConfig::Ccd(c) => Self::Ccd(CcdIk2D::new(c)?),
            Modifier2DConfig::Curve(c) => Self::Curve(CurveIk2D::new(c)?),
            Modifier2DConfig::Slider(c) => Self::Slider(Slider2D::new(c)?),
            Modifier2DConfig::Velvet(c) => Self::Velvet(Velvet2D::new(c)?),
        })
    }
}

impl Modifier<Transform2> for Modifier2D {
    type Config = Modifier2DConfig;

    fn name(&self) -> &str {
        match self {
            Self::LookAt(m) => m.name(),
            Self::TwoBone(m) => m.name(),
            Self::Duo(m) => m.name(),
            Self::Fabrik(m) => m.name(),
            Self::ConstrainedFabrik(m) => m.name(),
            Self::Ccd(m) => m.name(),
            Self::Curve(m) => m.name(),
            Self::Slider(m) => m.name(),
            Self::Velvet(m) => m.name(),
        }
    }

    /// Same-kind settings reconfigure in place; a different kind replaces
    /// the modifier.
    fn configure(&mut self, config: Modifier2DConfig) -> Result<(), ConfigError> {
        match (self, config) {
            (Self::LookAt(m), Modifier2DConfig::LookAt(c)) => m.configure(c),
            (Self::TwoBone(m), Modifier2DConfig::TwoBone(c)) => m.configure(c),
            (Self::Duo(m), Modifier2DConfig::Duo(c)) => m.configure(c),
            (Self::Fabrik(m), Modifier2DConfig::Fabrik(c)) => m.configure(c),
            (Self::ConstrainedFabrik(m), Modifier2DConfig::ConstrainedFabrik(c)) => {
                m.configure(c)
            }
            (Self::Ccd(m), Modifier2DConfig::Ccd(c)) => m.configure(c),
            (Self::Curve(m), Modifier2DConfig::Curve(c)) => m.configure(c),
            (Self::Slider(m), Modifier2DConfig::Slider(c)) => m.configure(c),
            (Self::Velvet(m), Modifier2DConfig::Velvet(c)) => m.configure(c),
            (this, other) => {
                *this = Self::try_from(other)?;
                Ok(())
            }
        }
    }

    fn execute(
        &mut self,
        ctx: &mut ModifierContext<'_, Transform2>,
    ) -> Result<SolveOutcome, SolveError> {
        match self {
            Self::LookAt(m) => m.execute(ctx),
            Self::TwoBone(m) => m.execute(ctx),
            Self::Duo(m) => m.execute(ctx),
            Self::Fabrik(m) => m.execute(ctx),
            Self::ConstrainedFabrik(m) => m.execute(ctx),
            Self::Ccd(m) => m.execute(ctx),
            Self::Curve(m) => m.execute(ctx),
            Self::Slider(m) => m.execute(ctx),
            Self::Velvet(m) => m.execute(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::{FRAC_PI_2, PI};

    use approx::assert_relative_eq;
    use tendon_core::scene::{NodeRef, SceneGraph};
    use tendon_core::skeleton::Skeleton2D;

    use super::*;

    #[test]
    fn aim_subtracts_rest_angle() {
        let pose = Transform2::identity();
        let aimed = aim(&pose, Vector2::new(0.0, 1.0), 0.0, 0.25).unwrap();
        assert_relative_eq!(aimed.rotation(), FRAC_PI_2 - 0.25, epsilon = 1e-6);
        assert!(aim(&pose, Vector2::zeros(), 0.0, 0.0).is_none());
    }

    #[test]
    fn bone_end_follows_heading() {
        let pose = Transform2::from_translation(Vector2::new(1.0, 0.0));
        assert_relative_eq!(
            bone_end(&pose, FRAC_PI_2, 2.0),
            Vector2::new(1.0, 2.0),
            epsilon = 1e-6
        );
    }

    #[test]
    fn cosine_angle_handles_degenerate_triangles() {
        assert_relative_eq!(cosine_angle(2.0, 3.0, 5.0).unwrap(), PI, epsilon = 1e-6);
        assert_relative_eq!(cosine_angle(3.0, 4.0, 5.0).unwrap(), FRAC_PI_2, epsilon = 1e-6);
        assert!(cosine_angle(1.0, 1.0, 5.0).is_none());
        assert!(cosine_angle(0.0, 1.0, 1.0).is_none());
    }

    #[test]
    fn local_constraint_is_relative_to_parent() {
        let mut skeleton = Skeleton2D::default();
        let parent = skeleton
            .add_bone("parent", None, Transform2::from_rotation(FRAC_PI_2, Vector2::zeros()))
            .unwrap();
        let child = skeleton
            .add_bone("child", Some(parent), Transform2::from_translation(Vector2::new(1.0, 0.0)))
            .unwrap();
        let mut scene = SceneGraph::new();
        let ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.0);

        // World rotation PI means local rotation PI / 2, clamped to [0, 0.5].
        let pose = ctx.pose(child).unwrap().with_rotation(PI);
        let constraint = AngleConstraint::new(0.0, 0.5);
        let clamped = constrain(&ctx, child, pose, &constraint).unwrap();
        assert_relative_eq!(clamped.rotation(), FRAC_PI_2 + 0.5, epsilon = 1e-5);

        let world = constrain(&ctx, child, pose, &constraint.in_world_space()).unwrap();
        assert_relative_eq!(world.rotation(), 0.5, epsilon = 1e-5);
    }

    #[test]
    fn configure_swaps_kind() {
        let mut modifier = Modifier2D::try_from(Modifier2DConfig::LookAt(LookAt2DConfig {
            bone: Some(BoneId(0)),
            target: Some(NodeRef::from("t")),
            ..LookAt2DConfig::default()
        }))
        .unwrap();
        assert_eq!(modifier.name(), "look_at_2d");

        modifier
            .configure(Modifier2DConfig::Slider(Slider2DConfig::default()))
            .unwrap();
        assert_eq!(modifier.name(), "slider_2d");
    }

    #[test]
    fn config_parses_tagged_toml() {
        let config: Modifier2DConfig = toml::from_str(
            r#"
            kind = "fabrik"
            target = { node = "target" }
            tolerance = 0.5
            joints = [{ bone = 0 }, { bone = 1, additional_rotation = 0.1 }]
            "#,
        )
        .unwrap();
        let Modifier2DConfig::Fabrik(fabrik) = config else {
            panic!("expected fabrik, got {config:?}");
        };
        assert_eq!(fabrik.joints.len(), 2);
        assert_eq!(fabrik.joints[1].bone, Some(BoneId(1)));
        assert_relative_eq!(fabrik.tolerance, 0.5);
        assert_eq!(fabrik.max_iterations, 10);
    }
}
