//! Core data model for the tendon IK engine.
//!
//! Everything a solver touches lives here: 2D/3D transforms, the
//! world ↔ pose-space converter, the bone arena, the angle clamp, baked
//! curves, the scene access trait, configuration and errors.
//!
//! # Quick Start
//!
//! ```
//! use nalgebra::Vector2;
//! use tendon_core::prelude::*;
//!
//! let mut skeleton = Skeleton2D::default();
//! let upper = skeleton.add_bone("upper", None, Transform2::identity()).unwrap();
//! let lower = skeleton
//!     .add_bone("lower", Some(upper), Transform2::from_translation(Vector2::new(1.0, 0.0)))
//!     .unwrap();
//! skeleton.auto_setup();
//!
//! assert_eq!(skeleton.bone(upper).unwrap().length(), 1.0);
//! assert!(!skeleton.bone(lower).unwrap().has_length());
//! ```

pub mod angle;
pub mod bone_forward;
pub mod config;
pub mod curve;
pub mod error;
pub mod pose;
pub mod scene;
pub mod skeleton;
pub mod transform;

pub mod prelude {
    pub use crate::angle::{AngleConstraint, clamp_angle};
    pub use crate::bone_forward::BoneForward;
    pub use crate::config::{Phase, StackConfig};
    pub use crate::curve::{BezierPoint, Curve2D, Curve3D, CurvePath};
    pub use crate::error::{ConfigError, SkeletonError, SolveError, TendonError};
    pub use crate::pose::{PoseSpace, to_pose_space, to_world_space};
    pub use crate::scene::{NodeId, NodeRef, SceneAccess, SceneGraph};
    pub use crate::skeleton::{Bone, BoneId, Skeleton, Skeleton2D, Skeleton3D, UNSET_LENGTH};
    pub use crate::transform::{Affine, BasisAxis, Transform2, Transform3};
}
