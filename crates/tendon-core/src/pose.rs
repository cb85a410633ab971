//! Conversion between world space and chain-relative pose space.
//!
//! Pose space is world space with the skeleton root factored out. Solvers do
//! all of their distance and angle math in pose space so a scaled, mirrored
//! or rotated root does not skew the result, and only convert back when
//! writing a bone.

use crate::transform::Affine;

/// `root⁻¹ ∘ world`. `None` when the root transform is singular.
pub fn to_pose_space<T: Affine>(world: &T, root: &T) -> Option<T> {
    Some(root.try_affine_inverse()?.compose(world))
}

/// `root ∘ pose`.
pub fn to_world_space<T: Affine>(pose: &T, root: &T) -> T {
    root.compose(pose)
}

/// A root transform together with its cached inverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSpace<T: Affine> {
    root: T,
    inverse: T,
}

impl<T: Affine> Default for PoseSpace<T> {
    fn default() -> Self {
        Self {
            root: T::identity(),
            inverse: T::identity(),
        }
    }
}

impl<T: Affine> PoseSpace<T> {
    /// `None` when `root` cannot be inverted.
    pub fn new(root: T) -> Option<Self> {
        let inverse = root.try_affine_inverse()?;
        Some(Self { root, inverse })
    }

    pub const fn root(&self) -> &T {
        &self.root
    }

    pub fn to_pose(&self, world: &T) -> T {
        self.inverse.compose(world)
    }

    pub fn to_world(&self, pose: &T) -> T {
        self.root.compose(pose)
    }

    pub fn point_to_pose(&self, point: T::Vector) -> T::Vector {
        self.inverse.xform(point)
    }

    pub fn point_to_world(&self, point: T::Vector) -> T::Vector {
        self.root.xform(point)
    }
}
