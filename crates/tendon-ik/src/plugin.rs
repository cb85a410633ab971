//! Bevy ECS integration for modifier stacks.
//!
//! Provides [`TendonIkPlugin`], which ticks the [`IkRig2D`] and [`IkRig3D`]
//! resources in `Update` (visual phase) and `FixedUpdate` (physics phase)
//! and keeps the most recent [`TickReport`] of each in [`LastTickReports`].
//!
//! # Usage
//!
//! 1. Add [`TendonIkPlugin`] to your app.
//! 2. Build bones into the rig's skeleton and place targets in its scene.
//! 3. Push modifiers onto the rig's stack.
//!
//! Both systems run in [`TendonIkSet`], so hosts can order their animation
//! systems before it.

use bevy::prelude::*;

use tendon_core::config::{Phase, StackConfig};
use tendon_core::error::ConfigError;
use tendon_core::scene::SceneGraph;
use tendon_core::skeleton::Skeleton;
use tendon_core::transform::{Affine, Transform2, Transform3};

use crate::ik2d::{Modifier2D, Modifier2DConfig};
use crate::ik3d::{Modifier3D, Modifier3DConfig};
use crate::modifier::Modifier;
use crate::stack::{ModifierStack, StackDefinition, TickReport};

/// System set holding both tick systems.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct TendonIkSet;

/// Bevy plugin that runs the 2D and 3D rigs every frame and fixed step.
pub struct TendonIkPlugin;

impl Plugin for TendonIkPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<IkRig2D>()
            .init_resource::<IkRig3D>()
            .init_resource::<LastTickReports>()
            .add_systems(Update, visual_tick_system.in_set(TendonIkSet))
            .add_systems(FixedUpdate, physics_tick_system.in_set(TendonIkSet));
    }
}

// ---------------------------------------------------------------------------
// Rigs
// ---------------------------------------------------------------------------

/// A skeleton, the scene its references resolve against, and the stack
/// that drives it.
#[derive(Resource, Debug, Clone)]
pub struct IkRig<T: Affine, M: Send + Sync + 'static> {
    pub skeleton: Skeleton<T>,
    pub scene: SceneGraph<T>,
    pub stack: ModifierStack<M>,
}

pub type IkRig2D = IkRig<Transform2, Modifier2D>;
pub type IkRig3D = IkRig<Transform3, Modifier3D>;

impl<T: Affine, M: Send + Sync + 'static> Default for IkRig<T, M> {
    fn default() -> Self {
        Self {
            skeleton: Skeleton::default(),
            scene: SceneGraph::new(),
            stack: ModifierStack::new(StackConfig::default()),
        }
    }
}

impl<T: Affine, M: Modifier<T> + Send + Sync + 'static> IkRig<T, M> {
    pub fn new(skeleton: Skeleton<T>, scene: SceneGraph<T>, stack: ModifierStack<M>) -> Self {
        Self {
            skeleton,
            scene,
            stack,
        }
    }

    /// Run the stack's `phase` entries against this rig.
    pub fn tick(&mut self, phase: Phase, delta: f32) -> TickReport {
        let Self {
            skeleton,
            scene,
            stack,
        } = self;
        stack.tick(phase, delta, skeleton, scene)
    }
}

impl IkRig2D {
    /// Replace the stack with one parsed from TOML.
    pub fn load_stack(&mut self, toml: &str) -> Result<(), ConfigError> {
        let definition = StackDefinition::<Modifier2DConfig>::from_toml_str(toml)?;
        self.stack = ModifierStack::from_definition(definition)?;
        Ok(())
    }
}

impl IkRig3D {
    /// Replace the stack with one parsed from TOML.
    pub fn load_stack(&mut self, toml: &str) -> Result<(), ConfigError> {
        let definition = StackDefinition::<Modifier3DConfig>::from_toml_str(toml)?;
        self.stack = ModifierStack::from_definition(definition)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Latest report per rig and phase. `None` until that tick has run once.
#[derive(Resource, Debug, Clone, Default)]
pub struct LastTickReports {
    pub visual_2d: Option<TickReport>,
    pub physics_2d: Option<TickReport>,
    pub visual_3d: Option<TickReport>,
    pub physics_3d: Option<TickReport>,
}

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

/// Tick both rigs' visual entries with the frame delta.
#[allow(clippy::needless_pass_by_value)]
pub fn visual_tick_system(
    time: Option<Res<Time>>,
    mut rig_2d: ResMut<IkRig2D>,
    mut rig_3d: ResMut<IkRig3D>,
    mut reports: ResMut<LastTickReports>,
) {
    let delta = time.map_or(0.0, |t| t.delta_secs());
    reports.visual_2d = Some(rig_2d.tick(Phase::Visual, delta));
    reports.visual_3d = Some(rig_3d.tick(Phase::Visual, delta));
}

/// Tick both rigs' physics entries with the fixed step.
#[allow(clippy::needless_pass_by_value)]
pub fn physics_tick_system(
    time: Option<Res<Time>>,
    mut rig_2d: ResMut<IkRig2D>,
    mut rig_3d: ResMut<IkRig3D>,
    mut reports: ResMut<LastTickReports>,
) {
    let delta = time.map_or(0.0, |t| t.delta_secs());
    reports.physics_2d = Some(rig_2d.tick(Phase::Physics, delta));
    reports.physics_3d = Some(rig_3d.tick(Phase::Physics, delta));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
