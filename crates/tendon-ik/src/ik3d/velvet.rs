//! Verlet-integrated secondary motion for 3D chains.

use bevy::log::warn;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use tendon_core::config::validate_iterations;
use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::NodeRef;
use tendon_core::skeleton::BoneId;
use tendon_core::transform::{BasisAxis, Transform3};

use super::{bone_tip, look_at, up_hint, with_rest_scale};
use crate::joint::{VelvetMode, resize_joints};
use crate::modifier::{Modifier, ModifierContext, SolveOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelvetJoint3D {
    #[serde(default)]
    pub bone: Option<BoneId>,

    #[serde(default)]
    pub override_defaults: bool,

    #[serde(default = "default_joint_mass")]
    pub mass: f32,

    #[serde(default = "default_joint_drag")]
    pub drag: f32,

    #[serde(default)]
    pub up_axis: BasisAxis,
}

const fn default_joint_mass() -> f32 {
    2.0
}
const fn default_joint_drag() -> f32 {
    0.25
}

impl Default for VelvetJoint3D {
    fn default() -> Self {
        Self {
            bone: None,
            override_defaults: false,
            mass: default_joint_mass(),
            drag: default_joint_drag(),
            up_axis: BasisAxis::default(),
        }
    }
}

impl VelvetJoint3D {
    pub fn new(bone: BoneId) -> Self {
        Self {
            bone: Some(bone),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelvetState3D {
    pub velocity: Vector3<f32>,
    pub acceleration: Vector3<f32>,
    pub last_position: Option<Vector3<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Velvet3DConfig {
    #[serde(default)]
    pub target: Option<NodeRef>,

    #[serde(default)]
    pub mode: VelvetMode,

    #[serde(default = "default_iteration_count")]
    pub iteration_count: usize,

    #[serde(default = "default_acceleration_speed")]
    pub acceleration_speed: f32,

    #[serde(default = "default_minimum_velocity")]
    pub minimum_required_velocity: f32,

    #[serde(default = "default_mass")]
    pub default_mass: f32,

    #[serde(default = "default_drag")]
    pub default_drag: f32,

    #[serde(default)]
    pub joints: Vec<VelvetJoint3D>,
}

const fn default_iteration_count() -> usize {
    4
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

impl Default for Velvet3DConfig {
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

impl Velvet3DConfig {
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

    pub fn physical(&self, joint: &VelvetJoint3D) -> (f32, f32) {
        if joint.override_defaults {
            (joint.mass, joint.drag)
        } else {
            (self.default_mass, self.default_drag)
        }
    }
}

/// 3D jiggle chain. Same integration as the 2D one; bones keep their reset
/// scale and take their roll from `up_axis`.
#[derive(Debug, Clone)]
pub struct Velvet3D {
    config: Velvet3DConfig,
    state: Vec<VelvetState3D>,
}

impl Velvet3D {
    pub fn new(config: Velvet3DConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let state = vec![VelvetState3D::default(); config.joints.len()];
        Ok(Self { config, state })
    }

    pub const fn config(&self) -> &Velvet3DConfig {
        &self.config
    }

    pub fn joint_state(&self, joint: usize) -> Option<&VelvetState3D> {
        self.state.get(joint)
    }

    pub fn set_joint_count(&mut self, count: usize) {
        resize_joints(&mut self.config.joints, count);
        resize_joints(&mut self.state, count);
    }

    pub fn reset(&mut self) {
        self.state.fill(VelvetState3D::default());
    }

    fn step(
        &mut self,
        ctx: &mut ModifierContext<'_, Transform3>,
        index: usize,
        target: Option<Vector3<f32>>,
    ) -> Result<bool, SolveError> {
        let joint = self.config.joints[index];
        let Some(bone) = joint.bone else {
            return Ok(false);
        };
        let length = ctx.pose_length(index, bone)?;
        let up = up_hint(ctx, bone, joint.up_axis)?;
        let pose = ctx.pose(bone)?;
        let goal = match target {
            Some(target) => target,
            None => bone_tip(&ctx.rest_pose(bone)?, length),
        };

        let (mass, drag) = self.config.physical(&joint);
        let speed = self.config.acceleration_speed;
        let dt = ctx.delta;
        let state = &mut self.state[index];
        let last = *state.last_position.get_or_insert(pose.origin);

        let pull = (goal - pose.origin)
            .try_normalize(f32::EPSILON)
            .map_or_else(Vector3::zeros, |dir| dir * length);
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
            .unwrap_or_else(Vector3::zeros);
        let aimed = if heading.norm_squared() > self.config.minimum_required_velocity {
            look_at(&pose, pose.origin + heading, up)
        } else {
            None
        };
        let turned = match aimed {
            Some(aimed) => ctx.set_pose(bone, with_rest_scale(ctx, bone, aimed)?)?,
            None => false,
        };

        let origin = ctx.pose(bone)?.origin;
        let state = &mut self.state[index];
        state.last_position = Some(last.lerp(&origin, (speed * dt).min(1.0)));
        Ok(turned)
    }
}

impl Modifier<Transform3> for Velvet3D {
    type Config = Velvet3DConfig;

    fn name(&self) -> &str {
        "velvet_3d"
    }

    fn configure(&mut self, config: Velvet3DConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.state.resize_with(config.joints.len(), VelvetState3D::default);
        self.config = config;
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut ModifierContext<'_, Transform3>,
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
            .resize_with(self.config.joints.len(), VelvetState3D::default);

        for (index, joint) in self.config.joints.iter().enumerate() {
            if joint.bone.is_none() {
                warn!("tendon-ik: velvet_3d joint {index} has no bone, skipping it");
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
