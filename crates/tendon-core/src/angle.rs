//! Angle clamping against a (possibly wrapping) arc.

use std::f32::consts::TAU;

use serde::{Deserialize, Serialize};

/// Map an angle into `[0, TAU]`. Values already in range are left alone so
/// that a full-turn bound of `TAU` keeps meaning "all the way round".
fn to_full_turn(angle: f32) -> f32 {
    if (0.0..=TAU).contains(&angle) {
        angle
    } else {
        angle.rem_euclid(TAU)
    }
}

fn chord_distance_squared(a: f32, b: f32) -> f32 {
    let dx = a.cos() - b.cos();
    let dy = a.sin() - b.sin();
    dx * dx + dy * dy
}

/// Clamp `angle` into the arc `[min_bound, max_bound]`, or out of it when
/// `invert` is set.
///
/// Bounds may be given in any order and any sign. An angle on the wrong side
/// snaps to whichever bound is nearer on the unit circle (chord distance), so
/// the nearest edge wins even across the `0/TAU` seam. Ties go to the minimum
/// bound. An angle that already satisfies the constraint is returned as-is.
pub fn clamp_angle(angle: f32, min_bound: f32, max_bound: f32, invert: bool) -> f32 {
    let normalized = to_full_turn(angle);
    let mut min = to_full_turn(min_bound);
    let mut max = to_full_turn(max_bound);
    if min > max {
        std::mem::swap(&mut min, &mut max);
    }

    let violates = if invert {
        normalized > min && normalized < max
    } else {
        normalized < min || normalized > max
    };
    if !violates {
        return angle;
    }

    if chord_distance_squared(normalized, min) <= chord_distance_squared(normalized, max) {
        min
    } else {
        max
    }
}

/// Per-joint angular limit, applied through [`clamp_angle`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleConstraint {
    #[serde(default)]
    pub enabled: bool,

    /// Lower bound in radians.
    #[serde(default)]
    pub min: f32,

    /// Upper bound in radians (default: a full turn).
    #[serde(default = "default_max")]
    pub max: f32,

    /// Keep the angle outside `[min, max]` instead of inside.
    #[serde(default)]
    pub invert: bool,

    /// Clamp the bone's parent-relative rotation instead of its world one.
    #[serde(default = "default_true")]
    pub in_local_space: bool,
}

const fn default_max() -> f32 {
    TAU
}
const fn default_true() -> bool {
    true
}

impl Default for AngleConstraint {
    fn default() -> Self {
        Self {
            enabled: false,
            min: 0.0,
            max: default_max(),
            invert: false,
            in_local_space: true,
        }
    }
}

impl AngleConstraint {
    /// Enabled constraint over `[min, max]`.
    pub const fn new(min: f32, max: f32) -> Self {
        Self {
            enabled: true,
            min,
            max,
            invert: false,
            in_local_space: true,
        }
    }

    #[must_use]
    pub const fn inverted(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    #[must_use]
    pub const fn in_world_space(mut self) -> Self {
        self.in_local_space = false;
        self
    }

    /// Clamp `angle`, or return it unchanged when disabled.
    pub fn apply(&self, angle: f32) -> f32 {
        if self.enabled {
            clamp_angle(angle, self.min, self.max, self.invert)
        } else {
            angle
        }
    }

    /// `true` when `angle` already satisfies the constraint.
    pub fn accepts(&self, angle: f32) -> bool {
        !self.enabled || clamp_angle(angle, self.min, self.max, self.invert) == angle
    }
}
