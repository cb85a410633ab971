//! Resizable per-joint settings, and the joint-level modes shared by the
//! 2D and 3D solvers.
//!
//! Every chain solver keeps a plain `Vec` of joint records. Changing the
//! joint count keeps existing records by index and default-fills new slots.

use serde::{Deserialize, Serialize};

/// Grow or shrink `joints` to `count` entries.
///
/// Entries below `count` are preserved untouched; new slots are
/// `J::default()`.
pub fn resize_joints<J: Default>(joints: &mut Vec<J>, count: usize) {
    joints.resize_with(count, J::default);
}

/// Order in which a CCD solver visits its joints during one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CcdSolveMode {
    /// Root to tip.
    #[default]
    Forward,
    /// For every joint `i`, sweep from `i` to the tip. Quadratic in the
    /// joint count.
    HighQuality,
    /// Tip to root.
    Backward,
    /// Tip to root, then root to tip.
    ForwardAndBackward,
}

impl CcdSolveMode {
    /// Joint indices in visiting order for a chain of `count` joints.
    pub fn sweep(self, count: usize) -> Vec<usize> {
        match self {
            Self::Forward => (0..count).collect(),
            Self::HighQuality => (0..count).flat_map(|i| i..count).collect(),
            Self::Backward => (0..count).rev().collect(),
            Self::ForwardAndBackward => (0..count).rev().chain(0..count).collect(),
        }
    }
}

/// What a Verlet joint is pulled toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelvetMode {
    /// The configured target node.
    #[default]
    FollowTarget,
    /// The end of the bone in its reset pose, so the chain sways back to
    /// the animated shape.
    FollowRest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_orders() {
        assert_eq!(CcdSolveMode::Forward.sweep(3), vec![0, 1, 2]);
        assert_eq!(CcdSolveMode::Backward.sweep(3), vec![2, 1, 0]);
        assert_eq!(CcdSolveMode::HighQuality.sweep(3), vec![0, 1, 2, 1, 2, 2]);
        assert_eq!(
            CcdSolveMode::ForwardAndBackward.sweep(2),
            vec![1, 0, 0, 1]
        );
        assert!(CcdSolveMode::Forward.sweep(0).is_empty());
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Joint {
        weight: u32,
    }

    #[test]
    fn grow_preserves_existing_and_defaults_new() {
        let mut joints = vec![Joint { weight: 7 }, Joint { weight: 9 }];
        resize_joints(&mut joints, 4);
        assert_eq!(joints.len(), 4);
        assert_eq!(joints[0].weight, 7);
        assert_eq!(joints[1].weight, 9);
        assert_eq!(joints[2], Joint::default());
        assert_eq!(joints[3], Joint::default());
    }

    #[test]
    fn shrink_keeps_prefix() {
        let mut joints = vec![Joint { weight: 1 }, Joint { weight: 2 }, Joint { weight: 3 }];
        resize_joints(&mut joints, 1);
        assert_eq!(joints, vec![Joint { weight: 1 }]);
        resize_joints(&mut joints, 0);
        assert!(joints.is_empty());
    }
}
