//! FABRIK with per-joint angle limits enforced inside both passes.
//!
//! Every position update is followed by writing the affected bones back
//! through their constraint, so later joints see the clamped result of
//! earlier ones. In the forward pass bones are also snapped back to their
//! parent-relative origins, keeping the chain rigid.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use tendon_core::angle::AngleConstraint;
use tendon_core::config::{validate_iterations, validate_tolerance};
use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::transform::Transform2;

use super::fabrik::{FabrikChain, FabrikJoint2D, aimed_pose, validate_joints};
use super::{constrain, with_local_origin};
use crate::joint::resize_joints;
use crate::modifier::{Modifier, ModifierContext, SolveOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstrainedFabrik2DConfig {
    #[serde(default)]
    pub target: Option<NodeRef>,

    #[serde(default = "default_tolerance")]
    pub tolerance: f32,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default)]
    pub joints: Vec<FabrikJoint2D>,

    /// Limit per joint, by index. Missing entries are unconstrained.
    #[serde(default)]
    pub constraints: Vec<AngleConstraint>,
}

const fn default_tolerance() -> f32 {
    0.01
}
const fn default_max_iterations() -> usize {
    10
}

impl Default for ConstrainedFabrik2DConfig {
    fn default() -> Self {
        Self {
            target: None,
            tolerance: default_tolerance(),
            max_iterations: default_max_iterations(),
            joints: Vec::new(),
            constraints: Vec::new(),
        }
    }
}

impl ConstrainedFabrik2DConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_tolerance(self.tolerance)?;
        validate_iterations(self.max_iterations)?;
        validate_joints(&self.joints)?;
        if self.constraints.len() > self.joints.len() {
            return Err(ConfigError::InvalidValue {
                field: "constraints".into(),
                message: format!(
                    "{} constraints for {} joints",
                    self.constraints.len(),
                    self.joints.len()
                ),
            });
        }
        Ok(())
    }

    fn constraint(&self, joint: usize) -> AngleConstraint {
        self.constraints.get(joint).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct ConstrainedFabrik2D {
    config: ConstrainedFabrik2DConfig,
}

/// Everything one solve needs besides the context.
struct Solve<'c> {
    config: &'c ConstrainedFabrik2DConfig,
    chain: FabrikChain,
    /// Parent-relative origins captured before solving.
    local_origins: Vec<Vector2<f32>>,
    target: Transform2,
}

impl ConstrainedFabrik2D {
    pub fn new(config: ConstrainedFabrik2DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &ConstrainedFabrik2DConfig {
        &self.config
    }

    pub fn set_joint_count(&mut self, count: usize) {
        resize_joints(&mut self.config.joints, count);
        resize_joints(&mut self.config.constraints, count);
    }
}

impl Solve<'_> {
    /// Aim, constrain and write one joint, then refresh its snapshot.
    fn apply_single(
        &mut self,
        ctx: &mut ModifierContext<'_, Transform2>,
        index: usize,
        snap_to_local: bool,
    ) -> Result<(), SolveError> {
        let bone = self.chain.bones[index];
        let aimed = aimed_pose(&mut self.chain, &self.config.joints, index, &self.target);
        let mut pose = constrain(ctx, bone, aimed, &self.config.constraint(index))?;
        if snap_to_local {
            pose = with_local_origin(ctx, bone, pose, self.local_origins[index])?;
        }
        if !ctx.set_pose(bone, pose)? {
            self.chain.skipped += 1;
        }
        self.chain.poses[index] = ctx.pose(bone)?;
        Ok(())
    }

    fn backward(&mut self, ctx: &mut ModifierContext<'_, Transform2>) -> Result<(), SolveError> {
        let tip = self.chain.tip();
        self.apply_single(ctx, tip, false)?;
        self.chain.place_tip(self.target.origin);
        for index in (1..=tip).rev() {
            self.apply_single(ctx, index - 1, false)?;
            self.apply_single(ctx, index, false)?;
            self.chain.pull_toward_tip(index);
        }
        Ok(())
    }

    fn forward(&mut self, ctx: &mut ModifierContext<'_, Transform2>) -> Result<(), SolveError> {
        let tip = self.chain.tip();
        self.apply_single(ctx, 0, true)?;
        for index in 0..tip {
            self.apply_single(ctx, index, true)?;
            self.chain.pull_toward_root(index);
            self.apply_single(ctx, index + 1, true)?;
        }
        self.apply_single(ctx, tip, true)
    }
}

impl Modifier<Transform2> for ConstrainedFabrik2D {
    type Config = ConstrainedFabrik2DConfig;

    fn name(&self) -> &str {
        "constrained_fabrik_2d"
    }

    fn configure(&mut self, config: ConstrainedFabrik2DConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut ModifierContext<'_, Transform2>,
    ) -> Result<SolveOutcome, SolveError> {
        let target = ctx.resolve_pose(self.config.target.as_ref(), SolveError::MissingTarget)?;
        let chain = FabrikChain::gather(ctx, self.config.joints.iter().map(|j| j.bone))?;
        let local_origins = chain
            .bones
            .iter()
            .map(|&bone| Ok(ctx.skeleton.local_transform(bone)?.origin))
            .collect::<Result<Vec<_>, SolveError>>()?;
        let mut solve = Solve {
            config: &self.config,
            chain,
            local_origins,
            target,
        };

        let mut residual = (solve.chain.end_effector() - target.origin).norm();
        let mut iterations = 0;
        while residual > self.config.tolerance && iterations < self.config.max_iterations {
            for (pose, joint) in solve.chain.poses.iter_mut().zip(&self.config.joints) {
                pose.origin += joint.magnet;
            }
            solve.backward(ctx)?;
            solve.forward(ctx)?;
            residual = (solve.chain.end_effector() - target.origin).norm();
            iterations += 1;
        }

        Ok(SolveOutcome {
            converged: residual <= self.config.tolerance,
            iterations,
            residual,
            skipped_joints: solve.chain.skipped,
        })
    }
}
