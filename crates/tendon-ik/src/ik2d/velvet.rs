//! Verlet-integrated secondary motion for 2D chains.
//!
//! Each joint carries velocity, acceleration and a smoothed copy of its
//! last position between runs. The bone never moves; it only turns to face
//! where the integration says it is heading.

use bevy::log::warn;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use tendon_core::config::validate_iterations;
use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::skeleton::BoneId;
use tendon_core::transform::Transform2;

use super::{aim, bone_end};
use crate::joint::resize_joints;
use crate::modifier::{Modifier, ModifierContext, SolveOutcome};

pub use crate::joint::VelvetMode;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelvetJoint2D {
    #[serde(default)]
    pub bone: Option<BoneId>,

    /// Use this joint's `mass` and `drag` instead of the solver defaults.
    #[serde(default)]
    pub override_defaults: bool,

    #[serde(default = "default_joint_mass")]
    pub mass: f32,

    #[serde(default = "default_joint_drag")]
    pub drag: f32,
}

const fn default_joint_mass() -> f32 {
    2.0
}
const fn default_joint_drag() -> f32 {
    0.25
}

impl Default for VelvetJoint2D {
    fn default() -> Self {
        Self {
            bone: None,
            override_defaults: false,
            mass: default_joint_mass(),
            drag: default_joint_drag(),
        }
    }
}

impl VelvetJoint2D {
    pub fn new(bone: BoneId) -> Self {
        Self {
            bone: Some(bone),
            ..Self::default()
        }
    }
}

/// Integration memory of one joint.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelvetState2D {
    pub velocity: Vector2<f32>,
    pub acceleration: Vector2<f32>,
    /// Smoothed pose-space origin. Seeded from the bone on first use.
    pub last_position: Option<Vector2<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Velvet2DConfig {
    #[serde(default)]
    pub target: Option<NodeRef>,

    #[serde(default)]
    pub mode: VelvetMode,

    /// Integration steps per run.
    #[serde(default = "default_iteration_count")]
    pub iteration_count: usize,

    #[serde(default = "default_acceleration_speed")]
    pub acceleration_speed: f32,

    /// Squared speed below which target pulls are ignored.
    #[serde(default = "default_minimum_velocity")]
    pub minimum_required_velocity: f32,

    #[serde(default = "default_mass")]
    pub default_mass: f32,

    #[serde(default = "default_drag")]
    pub default_drag: f32,

    #[serde(default)]
    pub joints: Vec<VelvetJoint2D>,
}

const fn default_iteration_count() -> usize {
    3
}
const fn default_acceleration_speed() -> f32 {
    40.0
}
const fn default_minimum_velocity() -> f32 {
    0.01
}
const fn default_mass() -> f32 {
    1.0
}
const fn default_drag() -> f32 {
    0.1
}

impl Default for Velvet2DConfig {
    fn default() -> Self {
        Self {
            target: None,
            mode: VelvetMode::default(),
            iteration_count: default_iteration_count(),
            acceleration_speed: default_acceleration_speed(),
            minimum_required_velocity: default_minimum_velocity(),
            default_mass: default_mass(),
            default_drag: default_drag(),
            joints: Vec::new(),
        }
    }
}

impl Velvet2DConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_iterations(self.iteration_count)?;
        for (field, value) in [
            ("acceleration_speed", self.acceleration_speed),
            ("minimum_required_velocity", self.minimum_required_velocity),
            ("default_drag", self.default_drag),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    message: format!("{value} (must be finite and >= 0)"),
                });
            }
        }
        if self.default_mass.is_nan() || self.default_mass <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "default_mass".into(),
                message: format!("{} (must be > 0)", self.default_mass),
            });
        }
        for (joint, settings) in self.joints.iter().enumerate() {
            if settings.override_defaults && (settings.mass.is_nan() || settings.mass <= 0.0) {
                return Err(ConfigError::InvalidMass {
                    joint,
                    mass: settings.mass,
                });
            }
        }
        Ok(())
    }

    /// Mass and drag in effect for `joint`.
    pub fn physical(&self, joint: &VelvetJoint2D) -> (f32, f32) {
        if joint.override_defaults {
            (joint.mass, joint.drag)
        } else {
            (self.default_mass, self.default_drag)
        }
    }
}

/// Jiggle chain: every joint is pulled toward the goal and its own past
/// position, integrated with velocity Verlet and quadratic drag.
#[derive(Debug, Clone)]
pub struct Velvet2D {
    config: Velvet2DConfig,
    state: Vec<VelvetState2D>,
}

impl Velvet2D {
    pub fn new(config: Velvet2DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let state = vec![VelvetState2D::default(); config.joints.len()];
        Ok(Self { config, state })
    }

    pub const fn config(&self) -> &Velvet2DConfig {
        &self.config
    }

    pub fn joint_state(&self, joint: usize) -> Option<&VelvetState2D> {
        self.state.get(joint)
    }

    pub fn set_joint_count(&mut self, count: usize) {
        resize_joints(&mut self.config.joints, count);
        resize_joints(&mut self.state, count);
    }

    /// Forget all integration memory.
    pub fn reset(&mut self) {
        self.state.fill(VelvetState2D::default());
    }

    fn step(
        &mut self,
        ctx: &mut ModifierContext<'_, Transform2>,
        index: usize,
        target: Option<Vector2<f32>>,
    ) -> Result<bool, SolveError> {
        let joint = self.config.joints[index];
        let Some(bone) = joint.bone else {
            return Ok(false);
        };
        let length = ctx.pose_length(index, bone)?;
        let rest_angle = ctx.skeleton.bone(bone)?.rest_angle();
        let pose = ctx.pose(bone)?;
        let goal = match target {
            Some(target) => target,
            None => bone_end(&ctx.rest_pose(bone)?, rest_angle, length),
        };

        let (mass, drag) = self.config.physical(&joint);
        let speed = self.config.acceleration_speed;
        let dt = ctx.delta;
        let state = &mut self.state[index];
        let last = *state.last_position.get_or_insert(pose.origin);

        let pull = (goal - pose.origin)
            .try_normalize(f32::EPSILON)
            .map_or_else(Vector2::zeros, |dir| dir * length);
        if pull.norm_squared() >= self.config.minimum_required_velocity {
            state.acceleration += pull;
        }
        state.acceleration += pose.origin - last;

        let next = pose.origin + state.velocity * dt + state.acceleration * (dt * dt * 0.5);
        let drag_accel = -state.velocity.component_mul(&state.velocity.abs()) * (0.5 * drag / mass);
        let new_acceleration = drag_accel * speed;
        state.velocity += (state.acceleration + new_acceleration) * (dt * 0.5);
        state.acceleration = new_acceleration;

        let heading = (next - pose.origin)
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(Vector2::zeros);
        let aimed = if heading.norm_squared() >= self.config.minimum_required_velocity {
            aim(&pose, pose.origin + heading, 0.0, rest_angle)
        } else {
            None
        };
        let turned = match aimed {
            Some(aimed) => ctx.set_pose(bone, aimed)?,
            None => false,
        };

        let origin = ctx.pose(bone)?.origin;
        let state = &mut self.state[index];
        state.last_position = Some(last.lerp(&origin, (speed * dt).min(1.0)));
        Ok(turned)
    }
}

impl Modifier<Transform2> for Velvet2D {
    type Config = Velvet2DConfig;

    fn name(&self) -> &str {
        "velvet_2d"
    }

    fn configure(&mut self, config: Velvet2DConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.state.resize_with(config.joints.len(), VelvetState2D::default);
        self.config = config;
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut ModifierContext<'_, Transform2>,
    ) -> Result<SolveOutcome, SolveError> {
        let target = match self.config.mode {
            VelvetMode::FollowTarget => Some(
                ctx.resolve_pose(self.config.target.as_ref(), SolveError::MissingTarget)?
                    .origin,
            ),
            VelvetMode::FollowRest => None,
        };
        if self.config.joints.is_empty() {
            return Err(SolveError::NoJoints);
        }
        self.state
            .resize_with(self.config.joints.len(), VelvetState2D::default);

        for (index, joint) in self.config.joints.iter().enumerate() {
            if joint.bone.is_none() {
                warn!("tendon-ik: velvet_2d joint {index} has no bone, skipping it");
            }
        }

        let mut skipped = 0;
        for _ in 0..self.config.iteration_count {
            skipped = 0;
            for index in 0..self.config.joints.len() {
                if !self.step(ctx, index, target)? {
                    skipped += 1;
                }
            }
        }

        let fastest = self
            .state
            .iter()
            .map(|s| s.velocity.norm())
            .fold(0.0_f32, f32::max);
        Ok(SolveOutcome {
            converged: fastest * fastest < self.config.minimum_required_velocity,
            iterations: self.config.iteration_count,
            residual: fastest,
            skipped_joints: skipped,
        })
    }
}
