//! Pole-driven two-bone IK in 3D.
//!
//! Both bones are first straightened toward the target. The knee is then
//! placed by turning bone one's direction by the law-of-cosines angle
//! toward the pole, and each bone is aimed at its next point.

use nalgebra::{Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::skeleton::BoneId;
use tendon_core::transform::{Affine, BasisAxis, DEGENERATE_EPSILON, Transform3};

use super::{add_rotation, aim_bone, bone_tip, up_hint, validate_euler, with_rest_scale};
use crate::ik2d::cosine_angle;
use crate::modifier::{Modifier, ModifierContext, SolveOutcome};

const REACH_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DuoIk3DConfig {
    #[serde(default)]
    pub target: Option<NodeRef>,

    /// Point the knee bends toward. Without one the knee bends along bone
    /// one's local +X.
    #[serde(default)]
    pub pole: Option<NodeRef>,

    #[serde(default)]
    pub bone_one: Option<BoneId>,

    #[serde(default)]
    pub bone_two: Option<BoneId>,

    #[serde(default)]
    pub bone_one_up_axis: BasisAxis,

    #[serde(default)]
    pub bone_two_up_axis: BasisAxis,

    #[serde(default)]
    pub bone_one_additional_rotation: Vector3<f32>,

    #[serde(default)]
    pub bone_two_additional_rotation: Vector3<f32>,
}

impl DuoIk3DConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_euler("bone_one_additional_rotation", &self.bone_one_additional_rotation)?;
        validate_euler("bone_two_additional_rotation", &self.bone_two_additional_rotation)
    }
}

#[derive(Debug, Clone)]
pub struct DuoIk3D {
    config: DuoIk3DConfig,
}

impl DuoIk3D {
    pub fn new(config: DuoIk3DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &DuoIk3DConfig {
        &self.config
    }
}

/// Direction from the bone origin toward `pole`, flattened into the bone's
/// local XY plane. Local +X when there is no pole or it lies on the axis.
fn bend_direction(pose: &Transform3, pole: Option<Vector3<f32>>) -> Option<Vector3<f32>> {
    let local = pole
        .and_then(|pole| {
            let mut local = pose.try_affine_inverse()?.xform(pole);
            local.z = 0.0;
            local.try_normalize(DEGENERATE_EPSILON)
        })
        .unwrap_or_else(Vector3::x);
    (pose.basis * local).try_normalize(DEGENERATE_EPSILON)
}

impl Modifier<Transform3> for DuoIk3D {
    type Config = DuoIk3DConfig;

    fn name(&self) -> &str {
        "duo_3d"
    }

    fn configure(&mut self, config: DuoIk3DConfig) -> Result<(), ConfigError> {
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
        let pole = match &self.config.pole {
            Some(pole) => Some(ctx.resolve_pose(Some(pole), SolveError::MissingPole)?.origin),
            None => None,
        };
        let one = self.config.bone_one.ok_or(SolveError::MissingBone { joint: 0 })?;
        let two = self.config.bone_two.ok_or(SolveError::MissingBone { joint: 1 })?;
        let length_one = ctx.pose_length(0, one)?;
        let length_two = ctx.pose_length(1, two)?;
        let up_one = up_hint(ctx, one, self.config.bone_one_up_axis)?;
        let up_two = up_hint(ctx, two, self.config.bone_two_up_axis)?;

        let mut skipped = 0;
        for (bone, up) in [(one, up_one), (two, up_two)] {
            if !aim_bone(ctx, bone, target, up)? {
                skipped += 1;
            }
        }

        let pose_one = ctx.pose(one)?;
        let distance = (target - pose_one.origin).norm();
        let reachable = distance <= length_one + length_two;
        if reachable {
            let distance = distance.max(length_one.min(length_two));
            let knee = cosine_angle(distance, length_one, length_two).and_then(|angle| {
                let toward = bend_direction(&pose_one, pole)?;
                let forward = pose_one.forward();
                let axis = Unit::try_new(forward.cross(&toward), DEGENERATE_EPSILON)?;
                let turned = UnitQuaternion::from_axis_angle(&axis, angle) * forward;
                Some(pose_one.origin + turned * length_one)
            });
            match knee {
                Some(knee) => {
                    if !aim_bone(ctx, one, knee, up_one)? {
                        skipped += 1;
                    }
                    if !aim_bone(ctx, two, target, up_two)? {
                        skipped += 1;
                    }
                }
                None => skipped = 2,
            }
        }

        add_rotation(ctx, one, self.config.bone_one_additional_rotation)?;
        add_rotation(ctx, two, self.config.bone_two_additional_rotation)?;
        for bone in [one, two] {
            let pose = with_rest_scale(ctx, bone, ctx.pose(bone)?)?;
            ctx.set_pose(bone, pose)?;
        }

        let residual = (bone_tip(&ctx.pose(two)?, length_two) - target).norm();
        Ok(SolveOutcome {
            converged: reachable && residual <= REACH_TOLERANCE,
            iterations: 1,
            residual,
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

    /// Two unit bones along -Z plus an end marker.
    fn rig(target: Vector3<f32>) -> (Skeleton3D, SceneGraph<Transform3>, [BoneId; 2]) {
        let mut skeleton = Skeleton3D::default();
        let step = Transform3::from_translation(Vector3::new(0.0, 0.0, -1.0));
        let thigh = skeleton.add_bone("thigh", None, Transform3::identity()).unwrap();
        let shin = skeleton.add_bone("shin", Some(thigh), step).unwrap();
        skeleton.add_bone("foot", Some(shin), step).unwrap();
        skeleton.auto_setup();
        let mut scene = SceneGraph::new();
        scene.insert("target", Transform3::from_translation(target));
        (skeleton, scene, [thigh, shin])
    }

    fn config(bones: [BoneId; 2]) -> DuoIk3DConfig {
        DuoIk3DConfig {
            target: Some(NodeRef::from("target")),
            pole: Some(NodeRef::from("pole")),
            bone_one: Some(bones[0]),
            bone_two: Some(bones[1]),
            ..DuoIk3DConfig::default()
        }
    }

    fn solve(
        target: Vector3<f32>,
        pole: Vector3<f32>,
    ) -> (Skeleton3D, [BoneId; 2], SolveOutcome) {
        let (mut skeleton, mut scene, bones) = rig(target);
        scene.insert("pole", Transform3::from_translation(pole));
        let mut modifier = DuoIk3D::new(config(bones)).unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        let outcome = modifier.execute(&mut ctx).unwrap();
        (skeleton, bones, outcome)
    }

    #[test]
    fn knee_bends_toward_pole() {
        let target = Vector3::new(0.0, 0.0, -1.5);
        for side in [1.0_f32, -1.0] {
            let (skeleton, bones, outcome) = solve(target, Vector3::new(0.0, 3.0 * side, -1.0));
            assert!(outcome.converged, "{outcome:?}");
            let knee = skeleton.world_transform(bones[1]).unwrap().origin;
            assert!(knee.y * side > 0.1, "knee {knee:?} for side {side}");
            let tip = bone_tip(&skeleton.world_transform(bones[1]).unwrap(), 1.0);
            assert_relative_eq!(tip, target, epsilon = 1e-4);
        }
    }

    #[test]
    fn out_of_reach_straightens() {
        let target = Vector3::new(0.0, 0.0, -4.0);
        let (skeleton, bones, outcome) = solve(target, Vector3::new(0.0, 3.0, -1.0));
        assert!(!outcome.converged);
        assert_relative_eq!(outcome.residual, 2.0, epsilon = 1e-4);
        assert_relative_eq!(
            skeleton.world_transform(bones[1]).unwrap().origin,
            Vector3::new(0.0, 0.0, -1.0),
            epsilon = 1e-5
        );
    }

    #[test]
    fn close_target_clamps_to_shortest_bone() {
        let target = Vector3::new(0.0, 0.0, -0.2);
        let (skeleton, bones, outcome) = solve(target, Vector3::new(3.0, 0.0, -1.0));
        // Distance is raised to 1, so the knee forms an equilateral triangle.
        let knee = skeleton.world_transform(bones[1]).unwrap().origin;
        assert_relative_eq!(knee.norm(), 1.0, epsilon = 1e-4);
        assert_relative_eq!(knee.angle(&-Vector3::z()), std::f32::consts::FRAC_PI_3, epsilon = 1e-3);
        assert!(knee.x > 0.0);
        assert!(outcome.residual > 0.0);
    }

    #[test]
    fn missing_pole_bends_along_local_x() {
        let target = Vector3::new(0.0, 0.0, -1.5);
        let (mut skeleton, mut scene, bones) = rig(target);
        let mut modifier = DuoIk3D::new(DuoIk3DConfig {
            pole: None,
            ..config(bones)
        })
        .unwrap();
        let mut ctx = ModifierContext::new(&mut skeleton, &mut scene, 0.016);
        assert!(modifier.execute(&mut ctx).unwrap().converged);
        assert!(skeleton.world_transform(bones[1]).unwrap().origin.x > 0.1);
    }
}
