//! Closed-form two-bone IK using the law of cosines.

use bevy::log::debug;
use serde::{Deserialize, Serialize};

use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::skeleton::BoneId;
use tendon_core::transform::Transform2;

use super::{aim, cosine_angle};
use crate::modifier::{Modifier, ModifierContext, SolveOutcome};

/// Settings for [`TwoBoneIk2D`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TwoBoneIk2DConfig {
    #[serde(default)]
    pub target: Option<NodeRef>,

    #[serde(default)]
    pub bone_one: Option<BoneId>,

    #[serde(default)]
    pub bone_two: Option<BoneId>,

    #[serde(default)]
    pub bone_one_additional_rotation: f32,

    #[serde(default)]
    pub bone_two_additional_rotation: f32,

    /// Bend the middle joint the other way.
    #[serde(default)]
    pub flip_bend_direction: bool,
}

impl TwoBoneIk2DConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("bone_one_additional_rotation", self.bone_one_additional_rotation),
            ("bone_two_additional_rotation", self.bone_two_additional_rotation),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    message: "must be finite".into(),
                });
            }
        }
        Ok(())
    }
}

/// Solves a bone pair so the end of bone two lands on the target.
///
/// When the target is out of reach both bones point straight at it.
#[derive(Debug, Clone)]
pub struct TwoBoneIk2D {
    config: TwoBoneIk2DConfig,
}

impl TwoBoneIk2D {
    pub fn new(config: TwoBoneIk2DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &TwoBoneIk2DConfig {
        &self.config
    }
}

impl Modifier<Transform2> for TwoBoneIk2D {
    type Config = TwoBoneIk2DConfig;

    fn name(&self) -> &str {
        "two_bone_2d"
    }

    fn configure(&mut self, config: TwoBoneIk2DConfig) -> Result<(), ConfigError> {
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
        let one = self.config.bone_one.ok_or(SolveError::MissingBone { joint: 0 })?;
        let two = self.config.bone_two.ok_or(SolveError::MissingBone { joint: 1 })?;
        let length_one = ctx.pose_length(0, one)?;
        let length_two = ctx.pose_length(1, two)?;
        let rest_one = ctx.skeleton.bone(one)?.rest_angle();
        let rest_two = ctx.skeleton.bone(two)?.rest_angle();

        let pose_one = ctx.pose(one)?;
        let difference = target - pose_one.origin;
        let distance = difference.norm();

        let outcome = if length_one + length_two < distance {
            // Out of reach: straighten both bones toward the target.
            let Some(aimed) = aim(&pose_one, target, 0.0, rest_one) else {
                return Ok(SolveOutcome::unreachable(distance).with_skipped(2));
            };
            ctx.set_pose(one, aimed)?;
            let pose_two = ctx.pose(two)?;
            if let Some(aimed) = aim(&pose_two, target, 0.0, rest_two) {
                ctx.set_pose(two, aimed)?;
            }
            SolveOutcome::unreachable(distance - length_one - length_two)
        } else {
            let (Some(mut angle_0), Some(mut angle_1)) = (
                cosine_angle(distance, length_one, length_two),
                cosine_angle(length_two, length_one, distance),
            ) else {
                debug!("tendon-ik: two_bone_2d cannot form a triangle this tick");
                return Ok(SolveOutcome::default().with_skipped(2));
            };
            if self.config.flip_bend_direction {
                angle_0 = -angle_0;
                angle_1 = -angle_1;
            }
            let heading = difference.y.atan2(difference.x);
            let direction_one = heading - angle_0;
            let direction_two = direction_one + std::f32::consts::PI - angle_1;

            ctx.set_pose(one, pose_one.with_rotation(direction_one - rest_one))?;
            let pose_two = ctx.pose(two)?;
            ctx.set_pose(two, pose_two.with_rotation(direction_two - rest_two))?;
            SolveOutcome::solved()
        };

        // Bone one's extra rotation carries bone two along with it.
        let pose_one = ctx.pose(one)?;
        ctx.set_pose(one, pose_one.rotated(self.config.bone_one_additional_rotation))?;
        let pose_two = ctx.pose(two)?;
        ctx.set_pose(two, pose_two.rotated(self.config.bone_two_additional_rotation))?;

        Ok(outcome)
    }
}
