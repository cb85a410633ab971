//! Forward-axis conventions for 3D rigs.
//!
//! Solvers treat local -Z as the direction a 3D bone points. Rigs exported
//! from other tools often point bones along +Y or +X instead; these helpers
//! convert a bone basis between the two conventions.

use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::transform::{Transform3, quat_from_two_vectors};

/// Local axis a host rig's bones point along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoneForward {
    X,
    NegX,
    Y,
    NegY,
    Z,
    #[default]
    NegZ,
}

impl BoneForward {
    pub fn axis(self) -> Vector3<f32> {
        match self {
            Self::X => Vector3::x(),
            Self::NegX => -Vector3::x(),
            Self::Y => Vector3::y(),
            Self::NegY => -Vector3::y(),
            Self::Z => Vector3::z(),
            Self::NegZ => -Vector3::z(),
        }
    }

    /// Dominant signed axis of the averaged offsets. `None` without offsets
    /// or when they cancel out.
    pub fn detect(offsets: impl IntoIterator<Item = Vector3<f32>>) -> Option<Self> {
        let mut sum = Vector3::zeros();
        let mut count = 0_u32;
        for offset in offsets {
            sum += offset;
            count += 1;
        }
        if count == 0 {
            return None;
        }
        let mean = sum / count as f32;
        let abs = mean.abs();
        if abs.max() <= f32::EPSILON {
            return None;
        }
        let forward = if abs.x >= abs.y && abs.x >= abs.z {
            if mean.x >= 0.0 { Self::X } else { Self::NegX }
        } else if abs.y >= abs.z {
            if mean.y >= 0.0 { Self::Y } else { Self::NegY }
        } else if mean.z >= 0.0 {
            Self::Z
        } else {
            Self::NegZ
        };
        Some(forward)
    }

    /// Local correction `C` with `C * -Z == axis`.
    fn correction(self) -> UnitQuaternion<f32> {
        quat_from_two_vectors(-Vector3::z(), self.axis()).unwrap_or_else(UnitQuaternion::identity)
    }

    fn correction_matrix(self) -> Matrix3<f32> {
        self.correction().to_rotation_matrix().into_inner()
    }

    /// Host bone transform → engine convention (-Z forward).
    pub fn to_engine(self, host: &Transform3) -> Transform3 {
        Transform3::new(host.basis * self.correction_matrix(), host.origin)
    }

    /// Engine transform → host convention.
    pub fn to_host(self, engine: &Transform3) -> Transform3 {
        Transform3::new(
            engine.basis * self.correction_matrix().transpose(),
            engine.origin,
        )
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::transform::Affine;

    #[test]
    fn detect_dominant_axis() {
        let offsets = [Vector3::new(0.1, -2.0, 0.0), Vector3::new(0.0, -1.0, 0.3)];
        assert_eq!(BoneForward::detect(offsets), Some(BoneForward::NegY));
    }

    #[test]
    fn detect_empty_is_none() {
        assert_eq!(BoneForward::detect(Vec::new()), None);
        assert_eq!(
            BoneForward::detect([Vector3::x(), -Vector3::x()]),
            None
        );
    }

    #[test]
    fn to_engine_points_forward_along_host_axis() {
        for forward in [
            BoneForward::X,
            BoneForward::NegX,
            BoneForward::Y,
            BoneForward::NegY,
            BoneForward::Z,
            BoneForward::NegZ,
        ] {
            let host = Transform3::identity();
            let engine = forward.to_engine(&host);
            assert_relative_eq!(engine.forward(), forward.axis(), epsilon = 1e-5);
            let back = forward.to_host(&engine);
            assert!(back.approx_eq(&host, 1e-5), "{forward:?}");
        }
    }
}
