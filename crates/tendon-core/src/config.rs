use std::path::Path;

use bevy::prelude::Resource;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_true() -> bool {
    true
}
const fn default_max_delta() -> f32 {
    0.1
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Which host update a modifier runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Once per rendered frame.
    #[default]
    Visual,
    /// Once per fixed physics step.
    Physics,
}

// ---------------------------------------------------------------------------
// StackConfig
// ---------------------------------------------------------------------------

/// Settings for one modifier stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Resource)]
pub struct StackConfig {
    /// Master switch; a disabled stack runs nothing.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Skip the first visual tick after construction, while the host is still
    /// settling transforms (default: true).
    #[serde(default = "default_true")]
    pub skip_first_visual_tick: bool,

    /// Restore bones to their pre-IK pose before each visual tick so every
    /// solve starts from the animated pose.
    #[serde(default)]
    pub restore_pre_ik_pose: bool,

    /// Larger deltas are clamped to this many seconds (default: 0.1).
    #[serde(default = "default_max_delta")]
    pub max_delta_seconds: f32,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_first_visual_tick: true,
            restore_pre_ik_pose: false,
            max_delta_seconds: default_max_delta(),
        }
    }
}

impl StackConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_delta_seconds.is_nan() || self.max_delta_seconds <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "max_delta_seconds".into(),
                message: format!("{} (must be > 0)", self.max_delta_seconds),
            });
        }
        Ok(())
    }

    /// Clamp a host delta into `[0, max_delta_seconds]`.
    pub fn clamp_delta(&self, delta: f32) -> f32 {
        if delta.is_finite() {
            delta.clamp(0.0, self.max_delta_seconds)
        } else {
            0.0
        }
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Read and parse a TOML file into any deserializable config.
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Shared check for convergence tolerances.
pub fn validate_tolerance(tolerance: f32) -> Result<(), ConfigError> {
    if tolerance > 0.0 && tolerance.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::InvalidTolerance(tolerance))
    }
}

/// Shared check for iteration counts.
pub fn validate_iterations(iterations: usize) -> Result<(), ConfigError> {
    if iterations == 0 {
        Err(ConfigError::InvalidIterations)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- StackConfig ----

    #[test]
    fn stack_config_default_values() {
        let cfg = StackConfig::default();
        assert!(cfg.enabled);
        assert!(cfg.skip_first_visual_tick);
        assert!(!cfg.restore_pre_ik_pose);
        assert!((cfg.max_delta_seconds - 0.1).abs() < f32::EPSILON);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn stack_config_toml_defaults() {
        let cfg: StackConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, StackConfig::default());
    }

    #[test]
    fn stack_config_toml_deserialization() {
        let toml_str = r"
            enabled = false
            skip_first_visual_tick = false
            restore_pre_ik_pose = true
            max_delta_seconds = 0.05
        ";
        let cfg: StackConfig = toml::from_str(toml_str).unwrap();
        assert!(!cfg.enabled);
        assert!(!cfg.skip_first_visual_tick);
        assert!(cfg.restore_pre_ik_pose);
        assert!((cfg.max_delta_seconds - 0.05).abs() < f32::EPSILON);
    }

    #[test]
    fn stack_config_validate_rejects_zero_delta() {
        let cfg = StackConfig {
            max_delta_seconds: 0.0,
            ..StackConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn stack_config_clamp_delta() {
        let cfg = StackConfig::default();
        assert!((cfg.clamp_delta(0.016) - 0.016).abs() < f32::EPSILON);
        assert!((cfg.clamp_delta(3.0) - 0.1).abs() < f32::EPSILON);
        assert!(cfg.clamp_delta(-1.0).abs() < f32::EPSILON);
        assert!(cfg.clamp_delta(f32::NAN).abs() < f32::EPSILON);
    }

    #[test]
    fn stack_config_from_file() {
        let dir = std::env::temp_dir().join("tendon_test_stack_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stack.toml");
        std::fs::write(&path, "restore_pre_ik_pose = true\n").unwrap();

        let cfg = StackConfig::from_file(&path).unwrap();
        assert!(cfg.restore_pre_ik_pose);

        // Cleanup
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn stack_config_from_file_invalid() {
        let dir = std::env::temp_dir().join("tendon_test_stack_config_invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stack.toml");
        std::fs::write(&path, "max_delta_seconds = -1.0\n").unwrap();

        assert!(StackConfig::from_file(&path).is_err());

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn stack_config_from_file_not_found() {
        let result = StackConfig::from_file("/nonexistent/path/stack.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    // ---- Phase ----

    #[test]
    fn phase_serde_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            phase: Phase,
        }
        let w: Wrapper = toml::from_str("phase = \"physics\"").unwrap();
        assert_eq!(w.phase, Phase::Physics);
    }

    // ---- Validators ----

    #[test]
    fn tolerance_and_iterations() {
        assert!(validate_tolerance(0.01).is_ok());
        assert!(matches!(
            validate_tolerance(0.0),
            Err(ConfigError::InvalidTolerance(_))
        ));
        assert!(validate_tolerance(f32::INFINITY).is_err());
        assert!(validate_iterations(1).is_ok());
        assert!(matches!(
            validate_iterations(0),
            Err(ConfigError::InvalidIterations)
        ));
    }
}
