//! Two-bone solver that places the middle joint by rotating bone one's
//! current heading, instead of re-deriving both angles from scratch.

use bevy::log::debug;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::skeleton::BoneId;
use tendon_core::transform::Transform2;

use super::{aim, cosine_angle};
use crate::modifier::{Modifier, ModifierContext, SolveOutcome};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DuoIk2DConfig {
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

    #[serde(default)]
    pub flip_bend_direction: bool,
}

impl DuoIk2DConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.bone_one_additional_rotation.is_finite()
            && self.bone_two_additional_rotation.is_finite())
        {
            return Err(ConfigError::InvalidValue {
                field: "additional_rotation".into(),
                message: "must be finite".into(),
            });
        }
        Ok(())
    }
}

/// Straightens the pair toward the target, then bends the middle joint out
/// by the law-of-cosines angle. Targets closer than the shorter bone are
/// treated as lying at that bone's length.
#[derive(Debug, Clone)]
pub struct DuoIk2D {
    config: DuoIk2DConfig,
}

impl DuoIk2D {
    pub fn new(config: DuoIk2DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &DuoIk2DConfig {
        &self.config
    }
}

impl Modifier<Transform2> for DuoIk2D {
    type Config = DuoIk2DConfig;

    fn name(&self) -> &str {
        "duo_2d"
    }

    fn configure(&mut self, config: DuoIk2DConfig) -> Result<(), ConfigError> {
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
        let add_one = self.config.bone_one_additional_rotation;
        let add_two = self.config.bone_two_additional_rotation;

        // Straighten first so the bend starts from a known heading.
        let Some(straight) = aim(&ctx.pose(one)?, target, 0.0, rest_one) else {
            return Ok(SolveOutcome::default().with_skipped(2));
        };
        ctx.set_pose(one, straight)?;
        let pose_two = ctx.pose(two)?;
        if let Some(straight) = aim(&pose_two, target, 0.0, rest_two) {
            ctx.set_pose(two, straight)?;
        }

        let pose_one = ctx.pose(one)?;
        let mut distance = (target - pose_one.origin).norm();
        if length_one + length_two < distance {
            if let Some(aimed) = aim(&pose_one, target, add_one, rest_one) {
                ctx.set_pose(one, aimed)?;
            }
            let pose_two = ctx.pose(two)?;
            if let Some(aimed) = aim(&pose_two, target, add_two, rest_two) {
                ctx.set_pose(two, aimed)?;
            }
            return Ok(SolveOutcome::unreachable(distance - length_one - length_two));
        }

        distance = distance.max(length_one.min(length_two));
        let Some(bend) = cosine_angle(distance, length_one, length_two) else {
            debug!("tendon-ik: duo_2d cannot form a triangle this tick");
            return Ok(SolveOutcome::default().with_skipped(2));
        };
        let bend = if self.config.flip_bend_direction { bend } else { -bend };
        let heading = pose_one.rotation() + rest_one + bend;
        let middle = pose_one.origin + Vector2::new(heading.cos(), heading.sin()) * length_one;

        let mut skipped = 0;
        match aim(&pose_one, middle, add_one, rest_one) {
            Some(aimed) => {
                ctx.set_pose(one, aimed)?;
            }
            None => skipped += 1,
        }
        let pose_two = ctx.pose(two)?;
        match aim(&pose_two, target, add_two, rest_two) {
            Some(aimed) => {
                ctx.set_pose(two, aimed)?;
            }
            None => skipped += 1,
        }
        Ok(SolveOutcome::solved().with_skipped(skipped))
    }
}
