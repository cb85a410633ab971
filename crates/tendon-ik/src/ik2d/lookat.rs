//! Point one bone at a target.

use serde::{Deserialize, Serialize};

use tendon_core::angle::AngleConstraint;
use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::skeleton::BoneId;
use tendon_core::transform::Transform2;

use super::{aim, constrain};
use crate::modifier::{Modifier, ModifierContext, SolveOutcome};

/// Settings for [`LookAt2D`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LookAt2DConfig {
    #[serde(default)]
    pub bone: Option<BoneId>,

    #[serde(default)]
    pub target: Option<NodeRef>,

    /// Radians added after aiming.
    #[serde(default)]
    pub additional_rotation: f32,

    #[serde(default)]
    pub constraint: AngleConstraint,
}

impl LookAt2DConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.additional_rotation.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "additional_rotation".into(),
                message: "must be finite".into(),
            });
        }
        Ok(())
    }
}

/// Rotates a single bone so it points at the target.
#[derive(Debug, Clone)]
pub struct LookAt2D {
    config: LookAt2DConfig,
}

impl LookAt2D {
    pub fn new(config: LookAt2DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &LookAt2DConfig {
        &self.config
    }
}

impl Modifier<Transform2> for LookAt2D {
    type Config = LookAt2DConfig;

    fn name(&self) -> &str {
        "look_at_2d"
    }

    fn configure(&mut self, config: LookAt2DConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut ModifierContext<'_, Transform2>,
    ) -> Result<SolveOutcome, SolveError> {
        let target = ctx.resolve_pose(self.config.target.as_ref(), SolveError::MissingTarget)?;
        let bone = self.config.bone.ok_or(SolveError::MissingBone { joint: 0 })?;
        let rest_angle = ctx.skeleton.bone(bone)?.rest_angle();

        let pose = ctx.pose(bone)?;
        let Some(aimed) = aim(&pose, target.origin, self.config.additional_rotation, rest_angle)
        else {
            return Ok(SolveOutcome::solved().with_skipped(1));
        };
        let pose = constrain(ctx, bone, aimed, &self.config.constraint)?;
        let written = ctx.set_pose(bone, pose)?;
        Ok(SolveOutcome::solved().with_skipped(usize::from(!written)))
    }
}
