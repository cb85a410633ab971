//! Solvers for 3D skeletons.
//!
//! 3D bones point along local -Z. Look-at style solvers take their roll
//! from one basis axis of the bone's reset pose, chosen per bone with a
//! [`BasisAxis`], so aiming never introduces twist the rig did not have.

pub mod ccdik;
pub mod curve;
pub mod duo;
pub mod fabrik;
pub mod lookat;
pub mod slider;
pub mod two_bone;
pub mod velvet;

use bevy::log::debug;
use nalgebra::{Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use tendon_core::angle::AngleConstraint;
use tendon_core::error::{ConfigError, SkeletonError, SolveError};
use tendon_core::skeleton::BoneId;
use tendon_core::transform::{Affine, BasisAxis, DEGENERATE_EPSILON, Transform3, swing_twist};

use crate::modifier::{Modifier, ModifierContext, SolveOutcome};

pub use ccdik::{CcdAxis, CcdIk3D, CcdIk3DConfig, CcdJoint3D};
pub use curve::{CurveIk3D, CurveIk3DConfig, CurveJoint3D};
pub use duo::{DuoIk3D, DuoIk3DConfig};
pub use fabrik::{Fabrik3D, Fabrik3DConfig, FabrikJoint3D};
pub use lookat::{LookAt3D, LookAt3DConfig};
pub use slider::{Slider3D, Slider3DConfig};
pub use two_bone::{TwoBoneIk3D, TwoBoneIk3DConfig};
pub use velvet::{Velvet3D, Velvet3DConfig, VelvetJoint3D, VelvetState3D};

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Unit `axis` of the bone's reset pose, used as the up hint when aiming.
pub(crate) fn up_hint(
    ctx: &ModifierContext<'_, Transform3>,
    bone: BoneId,
    axis: BasisAxis,
) -> Result<Vector3<f32>, SolveError> {
    Ok(ctx
        .rest_pose(bone)?
        .axis(axis)
        .try_normalize(DEGENERATE_EPSILON)
        .unwrap_or_else(Vector3::y))
}

/// Point -Z of `pose` at `point`. Falls back to a swing-only turn when
/// `up` is parallel to the aim direction; `None` when `point` sits on the
/// origin.
pub(crate) fn look_at(
    pose: &Transform3,
    point: Vector3<f32>,
    up: Vector3<f32>,
) -> Option<Transform3> {
    pose.looking_at(point, up)
        .or_else(|| pose.swing_looking_at(point))
}

/// Aim `bone` at `point` and write it back. Returns `false` when the aim
/// was degenerate and the bone was left alone.
pub(crate) fn aim_bone(
    ctx: &mut ModifierContext<'_, Transform3>,
    bone: BoneId,
    point: Vector3<f32>,
    up: Vector3<f32>,
) -> Result<bool, SolveError> {
    match look_at(&ctx.pose(bone)?, point, up) {
        Some(aimed) => ctx.set_pose(bone, aimed),
        None => {
            debug!("tendon-ik: {bone} sits on its aim point, skipping it");
            Ok(false)
        }
    }
}

/// Apply local Euler tweaks to `bone` and write it back.
pub(crate) fn add_rotation(
    ctx: &mut ModifierContext<'_, Transform3>,
    bone: BoneId,
    euler: Vector3<f32>,
) -> Result<(), SolveError> {
    if euler != Vector3::zeros() {
        let pose = ctx.pose(bone)?.with_additional_rotation(euler);
        ctx.set_pose(bone, pose)?;
    }
    Ok(())
}

/// Where a bone of `length` ends.
pub(crate) fn bone_tip(pose: &Transform3, length: f32) -> Vector3<f32> {
    pose.origin + pose.forward() * length
}

/// `pose` with the scale of the bone's reset pose.
pub(crate) fn with_rest_scale(
    ctx: &ModifierContext<'_, Transform3>,
    bone: BoneId,
    pose: Transform3,
) -> Result<Transform3, SolveError> {
    Ok(pose.with_scale(ctx.rest_pose(bone)?.scale().abs()))
}

pub(crate) fn parent_pose(
    ctx: &ModifierContext<'_, Transform3>,
    bone: BoneId,
) -> Result<Transform3, SolveError> {
    match ctx.skeleton.bone(bone)?.parent() {
        Some(parent) => ctx.pose(parent),
        None => Ok(Transform3::identity()),
    }
}

fn unit_axis(axis: BasisAxis) -> Unit<Vector3<f32>> {
    match axis {
        BasisAxis::X => Vector3::x_axis(),
        BasisAxis::Y => Vector3::y_axis(),
        BasisAxis::Z => Vector3::z_axis(),
    }
}

/// Clamp the twist of `rotation` about `axis` through `constraint`.
fn clamp_twist(
    rotation: &UnitQuaternion<f32>,
    axis: BasisAxis,
    constraint: &AngleConstraint,
) -> UnitQuaternion<f32> {
    let axis = unit_axis(axis);
    let (swing, twist) = swing_twist(rotation, &axis);
    swing * UnitQuaternion::from_axis_angle(&axis, constraint.apply(twist))
}

/// Clamp the rotation of `pose` about one of its basis axes, measured
/// against the parent frame or the world depending on the constraint.
pub(crate) fn constrain_axis(
    ctx: &ModifierContext<'_, Transform3>,
    bone: BoneId,
    pose: Transform3,
    axis: BasisAxis,
    constraint: &AngleConstraint,
) -> Result<Transform3, SolveError> {
    if !constraint.enabled {
        return Ok(pose);
    }
    if constraint.in_local_space {
        let parent = parent_pose(ctx, bone)?;
        let inverse = parent
            .try_affine_inverse()
            .ok_or(SkeletonError::SingularTransform(bone))?;
        let local = inverse.compose(&pose);
        let clamped = local.with_rotation(clamp_twist(&local.rotation_quat(), axis, constraint));
        Ok(parent.compose(&clamped))
    } else {
        let space = ctx.skeleton.pose_space();
        let world = space.to_world(&pose);
        let clamped = world.with_rotation(clamp_twist(&world.rotation_quat(), axis, constraint));
        Ok(space.to_pose(&clamped))
    }
}

pub(crate) fn validate_euler(field: &str, euler: &Vector3<f32>) -> Result<(), ConfigError> {
    if euler.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: field.into(),
            message: "must be finite".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Modifier3D
// ---------------------------------------------------------------------------

/// Settings for any 3D solver, tagged by `kind` in TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Modifier3DConfig {
    LookAt(LookAt3DConfig),
    TwoBone(TwoBoneIk3DConfig),
    Duo(DuoIk3DConfig),
    Fabrik(Fabrik3DConfig),
    Ccd(CcdIk3DConfig),
    Curve(CurveIk3DConfig),
    Slider(Slider3DConfig),
    Velvet(Velvet3DConfig),
}

/// One 3D solver of any kind.
#[derive(Debug, Clone)]
pub enum Modifier3D {
    LookAt(LookAt3D),
    TwoBone(TwoBoneIk3D),
    Duo(DuoIk3D),
    Fabrik(Fabrik3D),
    Ccd(CcdIk3D),
    Curve(CurveIk3D),
    Slider(Slider3D),
    Velvet(Velvet3D),
}

impl TryFrom<Modifier3DConfig> for Modifier3D {
    type Error = ConfigError;

    fn try_from(config: Modifier3DConfig) -> Result<Self, ConfigError> {
        Ok(match config {
            Modifier3DConfig::LookAt(c) => Self::LookAt(LookAt3D::new(c)?),
            Modifier3DConfig::TwoBone(c) => Self::TwoBone(TwoBoneIk3D::new(c)?),
            Modifier3DConfig::Duo(c) => Self::Duo(DuoIk3D::new(c)?),
            Modifier3DConfig::Fabrik(c) => Self::Fabrik(Fabrik3D::new(c)?),
            Modifier3DConfig::Ccd(c) => Self::Ccd(CcdIk3D::new(c)?),
            Modifier3DConfig::Curve(c) => Self::Curve(CurveIk3D::new(c)?),
            Modifier3DConfig::Slider(c) => Self::Slider(Slider3D::new(c)?),
            Modifier3DConfig::Velvet(c) => Self::Velvet(Velvet3D::new(c)?),
        })
    }
}

impl Modifier<Transform3> for Modifier3D {
    type Config = Modifier3DConfig;

    fn name(&self) -> &str {
        match self {
            Self::LookAt(m) => m.name(),
            Self::TwoBone(m) => m.name(),
            Self::Duo(m) => m.name(),
            Self::Fabrik(m) => m.name(),
            Self::Ccd(m) => m.name(),
            Self::Curve(m) => m.name(),
            Self::Slider(m) => m.name(),
            Self::Velvet(m) => m.name(),
        }
    }

    /// Same-kind settings reconfigure in place; a different kind replaces
    /// the modifier.
    fn configure(&mut self, config: Modifier3DConfig) -> Result<(), ConfigError> {
        match (self, config) {
            (Self::LookAt(m), Modifier3DConfig::LookAt(c)) => m.configure(c),
            (Self::TwoBone(m), Modifier3DConfig::TwoBone(c)) => m.configure(c),
            (Self::Duo(m), Modifier3DConfig::Duo(c)) => m.configure(c),
            (Self::Fabrik(m), Modifier3DConfig::Fabrik(c)) => m.configure(c),
            (Self::Ccd(m), Modifier3DConfig::Ccd(c)) => m.configure(c),
            (Self::Curve(m), Modifier3DConfig::Curve(c)) => m.configure(c),
            (Self::Slider(m), Modifier3DConfig::Slider(c)) => m.configure(c),
            (Self::Velvet(m), Modifier3DConfig::Velvet(c)) => m.configure(c),
            (this, other) => {
                *this = Self::try_from(other)?;
                Ok(())
            }
        }
    }

    fn execute(
        &mut self,
        ctx: &mut ModifierContext<'_, Transform3>,
    ) -> Result<SolveOutcome, SolveError> {
        match self {
            Self::LookAt(m) => m.execute(ctx),
            Self::TwoBone(m) => m.execute(ctx),
            Self::Duo(m) => m.execute(ctx),
            Self::Fabrik(m) => m.execute(ctx),
            Self::Ccd(m) => m.execute(ctx),
            Self::Curve(m) => m.execute(ctx),
            Self::Slider(m) => m.execute(ctx),
            Self::Velvet(m) => m.execute(ctx),
        }
    }
}
