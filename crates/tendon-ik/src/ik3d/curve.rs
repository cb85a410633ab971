//! Lay a 3D chain along a Bezier path.

use bevy::log::warn;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use tendon_core::curve::{BezierPoint, Curve3D};
use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::skeleton::BoneId;
use tendon_core::transform::{Affine, BasisAxis, Transform3};

use super::{look_at, up_hint, validate_euler, with_rest_scale};
use crate::joint::resize_joints;
use crate::modifier::{Modifier, ModifierContext, SolveOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CurveJoint3D {
    #[serde(default)]
    pub bone: Option<BoneId>,

    #[serde(default)]
    pub additional_rotation: Vector3<f32>,

    #[serde(default)]
    pub up_axis: BasisAxis,
}

impl CurveJoint3D {
    pub fn new(bone: BoneId) -> Self {
        Self {
            bone: Some(bone),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveIk3DConfig {
    #[serde(default)]
    pub curve_node: Option<NodeRef>,

    #[serde(default)]
    pub control_points: Vec<BezierPoint<3>>,

    #[serde(default = "default_bake_interval")]
    pub bake_interval: f32,

    #[serde(default)]
    pub starting_position: f32,

    #[serde(default)]
    pub stretch_bones_to_fit_curve: bool,

    #[serde(default)]
    pub scale_bones_to_fit_curve: bool,

    #[serde(default)]
    pub joints: Vec<CurveJoint3D>,
}

const fn default_bake_interval() -> f32 {
    0.05
}

impl Default for CurveIk3DConfig {
    fn default() -> Self {
        Self {
            curve_node: None,
            control_points: Vec::new(),
            bake_interval: default_bake_interval(),
            starting_position: 0.0,
            stretch_bones_to_fit_curve: false,
            scale_bones_to_fit_curve: false,
            joints: Vec::new(),
        }
    }
}

impl CurveIk3DConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bake_interval.is_nan() || self.bake_interval <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "bake_interval".into(),
                message: format!("{} (must be > 0)", self.bake_interval),
            });
        }
        if !self.starting_position.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "starting_position".into(),
                message: "must be finite".into(),
            });
        }
        for (index, joint) in self.joints.iter().enumerate() {
            validate_euler(&format!("joints[{index}].additional_rotation"), &joint.additional_rotation)?;
        }
        Ok(())
    }
}

/// Places each joint on the curve one bone length apart and aims it at the
/// next sample.
#[derive(Debug, Clone)]
pub struct CurveIk3D {
    config: CurveIk3DConfig,
    baked: Curve3D,
}

impl CurveIk3D {
    pub fn new(config: CurveIk3DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let baked = Curve3D::from_bezier(&config.control_points, config.bake_interval);
        Ok(Self { config, baked })
    }

    pub const fn config(&self) -> &CurveIk3DConfig {
        &self.config
    }

    pub fn set_joint_count(&mut self, count: usize) {
        resize_joints(&mut self.config.joints, count);
    }

    fn pose_curve(&self, ctx: &ModifierContext<'_, Transform3>) -> Result<Curve3D, SolveError> {
        let curve_world = match &self.config.curve_node {
            Some(node) => ctx.resolve_world(node)?,
            None => Transform3::identity(),
        };
        let space = ctx.skeleton.pose_space();
        Ok(self
            .baked
            .map_points(|p| space.point_to_pose(curve_world.xform(p))))
    }

    /// Uniformly scale the first bone's local transform.
    fn scale_first_bone(
        ctx: &mut ModifierContext<'_, Transform3>,
        bone: BoneId,
        scale: f32,
    ) -> Result<(), SolveError> {
        let local = ctx.skeleton.local_transform(bone)?;
        ctx.notify(bone)?;
        ctx.skeleton.set_local_transform(
            bone,
            Transform3::from_parts(local.rotation_quat(), Vector3::repeat(scale), local.origin),
        )?;
        Ok(())
    }
}

impl Modifier<Transform3> for CurveIk3D {
    type Config = CurveIk3DConfig;

    fn name(&self) -> &str {
        "curve_3d"
    }

    fn configure(&mut self, config: CurveIk3DConfig) -> Result<(), ConfigError> {
        *self = Self::new(config)?;
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut ModifierContext<'_, Transform3>,
    ) -> Result<SolveOutcome, SolveError> {
        if self.config.control_points.is_empty() {
            return Err(SolveError::MissingCurve);
        }
        if self.config.joints.is_empty() {
            return Err(SolveError::NoJoints);
        }
        let curve = self.pose_curve(ctx)?;
        if curve.is_empty() {
            return Err(SolveError::EmptyCurve);
        }

        let mut lengths = Vec::with_capacity(self.config.joints.len());
        for (index, joint) in self.config.joints.iter().enumerate() {
            lengths.push(match joint.bone {
                Some(bone) => Some(ctx.pose_length(index, bone)?),
                None => None,
            });
        }

        let stretch = self.config.stretch_bones_to_fit_curve;
        let rescaled = stretch && self.config.scale_bones_to_fit_curve;
        let mut scale = 1.0;
        if stretch {
            let total: f32 = lengths.iter().flatten().sum();
            if total > f32::EPSILON {
                scale = curve.baked_length() / total;
            }
            if let (true, Some(first)) = (rescaled, self.config.joints[0].bone) {
                Self::scale_first_bone(ctx, first, scale)?;
            }
        }

        let mut position = self.config.starting_position;
        let mut skipped = 0;
        for (index, (joint, length)) in self.config.joints.iter().zip(&lengths).enumerate() {
            let (Some(bone), Some(length)) = (joint.bone, *length) else {
                warn!("tendon-ik: curve_3d joint {index} has no bone, skipping it");
                skipped += 1;
                continue;
            };
            let up = up_hint(ctx, bone, joint.up_axis)?;

            let mut pose = ctx.pose(bone)?;
            pose.origin = curve.sample_baked(position).ok_or(SolveError::EmptyCurve)?;
            position += if stretch { length * scale } else { length };

            let look = curve.sample_baked(position).ok_or(SolveError::EmptyCurve)?;
            let pose = match look_at(&pose, look, up) {
                Some(aimed) => aimed.with_additional_rotation(joint.additional_rotation),
                None => {
                    skipped += 1;
                    pose
                }
            };
            let pose = if rescaled {
                pose
            } else {
                with_rest_scale(ctx, bone, pose)?
            };
            ctx.set_pose(bone, pose)?;
        }

        let overshoot = (position - curve.baked_length()).max(0.0);
        Ok(SolveOutcome {
            converged: overshoot <= f32::EPSILON * 16.0,
            iterations: 1,
            residual: overshoot,
            skipped_joints: skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use tendon_core::scene::SceneGraph;
    use tendon_core::skeleton::Skeleton3D;

    use super::*;

    /// `count` unit bones along -Z plus an end marker.
    fn rig(count: usize) -> (Skeleton3D, SceneGraph<Transform3>, Vec<BoneId>) {
        let mut skeleton = Skeleton3D::default();
        let mut bones = Vec::new();
        let mut parent = None;
        for i in 0..=count {
            let offset = if i == 0 { 0.0 } else { -1.0 };
            let id = skeleton
                .add_bone(
                    format!("b{i}"),
                    parent,
                    Transform3::from_translation(Vector3::new(0.0, 0.0, offset)),
                )
                .unwrap();
            bones.push(id);
            parent = Some(id);
        }
        skeleton.auto_setup();
        (skeleton, SceneGraph::new(), bones)
    }

    fn config(points: &[[f32; 3]], bones: &[BoneId]) -> CurveIk3DConfig {
        CurveIk3DConfig {
            control_points: points
                .iter()
                .map(|p| BezierPoint::corner(Vector3::new(p[0], p[1], p[2])))
                .collect(),
            joints: bones.iter().copied().map(CurveJoint3D::new).collect(),
            ..CurveIk3DConfig::default()
        }
    }

    fn origin(skeleton: &Skeleton3D, bone: BoneId) -> Vector3<f32> {
        skeleton.world_transform(bone).unwrap().origin
    }

    #[test]
    fn follows_a_bent_path() {
        let (mut skeleton, mut scene, bones) = rig(3);
        let mut modifier = CurveIk3D::new(config(
            &[[0.0, 0.0, 0.0], [0.0, 0.0, -2.0], [2.0, 0.0, -2.0]],
            &bones[..3],
        ))
        .unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        assert!(modifier.execute(&mut ctx).unwrap().converged);

        assert_relative_eq!(origin(&skeleton, bones[1]), Vector3::new(0.0, 0.0, -1.0), epsilon = 1e-4);
        assert_relative_eq!(origin(&skeleton, bones[2]), Vector3::new(0.0, 0.0, -2.0), epsilon = 1e-4);
        assert_relative_eq!(
            skeleton.world_transform(bones[2]).unwrap().forward(),
            Vector3::x(),
            epsilon = 1e-4
        );
        assert_relative_eq!(origin(&skeleton, bones[3]), Vector3::new(1.0, 0.0, -2.0), epsilon = 1e-4);
    }

    #[test]
    fn curve_node_moves_the_path() {
        let (mut skeleton, mut scene, bones) = rig(2);
        scene.insert("path", Transform3::from_translation(Vector3::new(0.0, 3.0, 0.0)));
        let mut modifier = CurveIk3D::new(CurveIk3DConfig {
            curve_node: Some(NodeRef::from("path")),
            starting_position: 0.5,
            ..config(&[[0.0, 0.0, 0.0], [0.0, 0.0, -5.0]], &bones[..2])
        })
        .unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        modifier.execute(&mut ctx).unwrap();
        assert_relative_eq!(origin(&skeleton, bones[0]), Vector3::new(0.0, 3.0, -0.5), epsilon = 1e-4);
        assert_relative_eq!(origin(&skeleton, bones[2]), Vector3::new(0.0, 3.0, -2.5), epsilon = 1e-4);
    }

    #[test]
    fn stretch_and_scale_fit_the_curve() {
        let (mut skeleton, mut scene, bones) = rig(2);
        let mut modifier = CurveIk3D::new(CurveIk3DConfig {
            stretch_bones_to_fit_curve: true,
            scale_bones_to_fit_curve: true,
            ..config(&[[0.0, 0.0, 0.0], [0.0, 0.0, -4.0]], &bones[..2])
        })
        .unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        assert!(modifier.execute(&mut ctx).unwrap().converged);
        assert_relative_eq!(origin(&skeleton, bones[1]), Vector3::new(0.0, 0.0, -2.0), epsilon = 1e-4);
        assert_relative_eq!(
            skeleton.local_transform(bones[0]).unwrap().scale(),
            Vector3::repeat(2.0),
            epsilon = 1e-4
        );
    }

    #[test]
    fn chain_longer_than_curve_reports_overshoot() {
        let (mut skeleton, mut scene, bones) = rig(3);
        let mut modifier =
            CurveIk3D::new(config(&[[0.0, 0.0, 0.0], [0.0, 0.0, -1.5]], &bones[..3])).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let outcome = modifier.execute(&mut ctx).unwrap();
        assert!(!outcome.converged);
        assert_relative_eq!(outcome.residual, 1.5, epsilon = 1e-4);
        assert!(skeleton.world_transform(bones[2]).unwrap().is_finite());
    }

    #[test]
    fn missing_curve_and_joints() {
        let (mut skeleton, mut scene, bones) = rig(1);
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let mut no_curve = CurveIk3D::new(config(&[], &bones[..1])).unwrap();
        assert_eq!(no_curve.execute(&mut ctx), Err(SolveError::MissingCurve));
        let mut no_joints = CurveIk3D::new(config(&[[0.0, 0.0, 0.0], [0.0, 0.0, -1.0]], &[])).unwrap();
        assert_eq!(no_joints.execute(&mut ctx), Err(SolveError::NoJoints));
    }
}
