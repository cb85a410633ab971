//! Ordered scheduler for modifiers.
//!
//! [`ModifierStack::tick`] is the single entry point the host calls once per
//! phase per frame. Entries run in insertion order, so a later modifier sees
//! what an earlier one wrote. A failing entry is logged and recorded in the
//! [`TickReport`]; the remaining entries still run.

use std::path::Path;

use bevy::log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use tendon_core::config::{Phase, StackConfig, load_toml};
use tendon_core::error::{ConfigError, SolveError};
use tendon_core::scene::SceneAccess;
use tendon_core::skeleton::Skeleton;
use tendon_core::transform::Affine;

use crate::modifier::{Modifier, ModifierContext, SolveOutcome};

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One slot in the stack.
#[derive(Debug, Clone)]
pub struct StackEntry<M> {
    pub modifier: M,
    pub enabled: bool,
    pub phase: Phase,
}

/// Result of one entry during one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryReport {
    /// Position in the stack.
    pub index: usize,
    pub name: String,
    pub result: Result<SolveOutcome, SolveError>,
}

/// Why a tick did or did not run its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickStatus {
    #[default]
    Ran,
    /// The stack-level switch is off.
    Disabled,
    /// First visual tick after construction.
    SkippedFirstTick,
}

/// Everything that happened during one [`ModifierStack::tick`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickReport {
    pub phase: Phase,
    pub status: TickStatus,
    /// Bones restored to their animated pose before the entries ran.
    pub restored_bones: usize,
    pub entries: Vec<EntryReport>,
}

impl TickReport {
    const fn idle(phase: Phase, status: TickStatus) -> Self {
        Self {
            phase,
            status,
            restored_bones: 0,
            entries: Vec::new(),
        }
    }

    /// Number of entries that ran this tick.
    pub fn ran(&self) -> usize {
        self.entries.len()
    }

    /// Conditions reported by entries that aborted.
    pub fn errors(&self) -> impl Iterator<Item = (usize, &SolveError)> {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().err().map(|err| (e.index, err)))
    }

    pub fn all_ok(&self) -> bool {
        self.entries.iter().all(|e| e.result.is_ok())
    }
}

// ---------------------------------------------------------------------------
// ModifierStack
// ---------------------------------------------------------------------------

/// Ordered list of modifiers of one kind.
#[derive(Debug, Clone)]
pub struct ModifierStack<M> {
    entries: Vec<StackEntry<M>>,
    config: StackConfig,
    visual_ticks: u64,
}

impl<M> Default for ModifierStack<M> {
    fn default() -> Self {
        Self::new(StackConfig::default())
    }
}

impl<M> ModifierStack<M> {
    pub const fn new(config: StackConfig) -> Self {
        Self {
            entries: Vec::new(),
            config,
            visual_ticks: 0,
        }
    }

    /// Build a stack from a parsed definition, converting every entry's
    /// settings into a modifier.
    pub fn from_definition<C>(definition: StackDefinition<C>) -> Result<Self, ConfigError>
    where
        M: TryFrom<C, Error = ConfigError>,
    {
        definition.stack.validate()?;
        let mut stack = Self::new(definition.stack);
        for entry in definition.modifiers {
            let index = stack.push(M::try_from(entry.config)?, entry.phase);
            stack.entries[index].enabled = entry.enabled;
        }
        Ok(stack)
    }

    /// Append a modifier and return its index.
    pub fn push(&mut self, modifier: M, phase: Phase) -> usize {
        self.entries.push(StackEntry {
            modifier,
            enabled: true,
            phase,
        });
        self.entries.len() - 1
    }

    /// Insert at `index`, or append when `index` is past the end.
    pub fn insert(&mut self, index: usize, modifier: M, phase: Phase) -> usize {
        let index = index.min(self.entries.len());
        self.entries.insert(
            index,
            StackEntry {
                modifier,
                enabled: true,
                phase,
            },
        );
        index
    }

    pub fn remove(&mut self, index: usize) -> Option<M> {
        (index < self.entries.len()).then(|| self.entries.remove(index).modifier)
    }

    /// Returns `false` when `index` is out of range.
    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        entry.enabled = enabled;
        true
    }

    /// Returns `false` when `index` is out of range.
    pub fn set_phase(&mut self, index: usize, phase: Phase) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        entry.phase = phase;
        true
    }

    pub fn get(&self, index: usize) -> Option<&StackEntry<M>> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut StackEntry<M>> {
        self.entries.get_mut(index)
    }

    pub fn entries(&self) -> &[StackEntry<M>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: StackConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Stack-level switch.
    pub const fn set_stack_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    /// Run every enabled entry tagged `phase`, in order.
    pub fn tick<T: Affine>(
        &mut self,
        phase: Phase,
        delta: f32,
        skeleton: &mut Skeleton<T>,
        scene: &mut dyn SceneAccess<T>,
    ) -> TickReport
    where
        M: Modifier<T>,
    {
        if !self.config.enabled {
            return TickReport::idle(phase, TickStatus::Disabled);
        }

        let mut report = TickReport::idle(phase, TickStatus::Ran);
        if phase == Phase::Visual {
            self.visual_ticks += 1;
            if self.visual_ticks == 1 && self.config.skip_first_visual_tick {
                report.status = TickStatus::SkippedFirstTick;
                return report;
            }
            if self.config.restore_pre_ik_pose {
                report.restored_bones = skeleton.restore_pre_ik_poses();
            }
        }

        let delta = self.config.clamp_delta(delta);
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if !entry.enabled || entry.phase != phase {
                continue;
            }
            let mut ctx = ModifierContext::new(&mut *skeleton, &mut *scene, delta);
            let result = entry.modifier.execute(&mut ctx);
            let name = entry.modifier.name().to_owned();
            if let Err(e) = &result {
                warn!("tendon-ik: {name} (entry {index}) skipped this tick: {e}");
            }
            report.entries.push(EntryReport {
                index,
                name,
                result,
            });
        }
        report
    }
}

// ---------------------------------------------------------------------------
// TOML definitions
// ---------------------------------------------------------------------------

const fn default_true() -> bool {
    true
}

/// One `[[modifier]]` table of a stack file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDefinition<C> {
    #[serde(default)]
    pub phase: Phase,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Solver settings, tagged by `kind`.
    pub config: C,
}

/// A whole stack as written in a TOML file.
///
/// ```toml
/// [stack]
/// skip_first_visual_tick = false
///
/// [[modifier]]
/// phase = "visual"
/// [modifier.config]
/// kind = "look_at"
/// bone = 0
/// target = { node = "target" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "C: Deserialize<'de>"))]
pub struct StackDefinition<C> {
    #[serde(default)]
    pub stack: StackConfig,

    #[serde(default, rename = "modifier")]
    pub modifiers: Vec<EntryDefinition<C>>,
}

impl<C: DeserializeOwned> StackDefinition<C> {
    /// Parse a stack file. Solver settings are validated when the stack is
    /// built from the definition.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let definition: Self = load_toml(path)?;
        definition.stack.validate()?;
        Ok(definition)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let definition: Self = toml::from_str(content)?;
        definition.stack.validate()?;
        Ok(definition)
    }
}
