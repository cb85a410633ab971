//! Inverse kinematics and secondary motion for tendon skeletons.
//!
//! Provides look-at, two-bone, pole-driven duo, FABRIK (with a constrained
//! variant), CCD, curve-follow, slider and Verlet solvers for both 2D and 3D
//! chains, an ordered [`ModifierStack`] that runs them per phase, and a
//! Bevy plugin that ticks the stacks every frame.
//!
//! # Architecture
//!
//! ```text
//! SceneAccess ──► ModifierContext ──► Modifier::execute ──► Skeleton poses
//!                        ▲
//!            ModifierStack::tick (visual / physics)
//! ```
//!
//! Every solver works in pose space (the skeleton root factored out) and
//! writes bones back through [`ModifierContext::set_pose`], which refuses
//! non-finite transforms.

pub mod ik2d;
pub mod ik3d;
pub mod joint;
pub mod modifier;
pub mod plugin;
pub mod stack;

pub use modifier::{Modifier, ModifierContext, SolveOutcome};
pub use plugin::{IkRig, IkRig2D, IkRig3D, LastTickReports, TendonIkPlugin, TendonIkSet};
pub use stack::{ModifierStack, StackDefinition, TickReport, TickStatus};

pub mod prelude {
    pub use crate::ik2d::{
        CcdIk2D, CcdIk2DConfig, CcdJoint2D, ConstrainedFabrik2D, ConstrainedFabrik2DConfig,
        CurveIk2D, CurveIk2DConfig, CurveJoint2D, DuoIk2D, DuoIk2DConfig, Fabrik2D,
        Fabrik2DConfig, FabrikJoint2D, LookAt2D, LookAt2DConfig, Modifier2D, Modifier2DConfig,
        Slider2D, Slider2DConfig, TwoBoneIk2D, TwoBoneIk2DConfig, Velvet2D, Velvet2DConfig,
        VelvetJoint2D,
    };
    pub use crate::ik3d::{
        CcdAxis, CcdIk3D, CcdIk3DConfig, CcdJoint3D, CurveIk3D, CurveIk3DConfig, CurveJoint3D,
        DuoIk3D, DuoIk3DConfig, Fabrik3D, Fabrik3DConfig, FabrikJoint3D, LookAt3D,
        LookAt3DConfig, Modifier3D, Modifier3DConfig, Slider3D, Slider3DConfig, TwoBoneIk3D,
        TwoBoneIk3DConfig, Velvet3D, Velvet3DConfig, VelvetJoint3D,
    };
    pub use crate::joint::{CcdSolveMode, VelvetMode};
    pub use crate::modifier::{Modifier, ModifierContext, SolveOutcome};
    pub use crate::plugin::{IkRig2D, IkRig3D, LastTickReports, TendonIkPlugin};
    pub use crate::stack::{ModifierStack, StackDefinition, TickReport, TickStatus};
}
