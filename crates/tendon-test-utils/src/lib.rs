//! Shared test fixtures for tendon crates.
//!
//! Provides straight-chain rig builders, a Bevy app with the IK plugin
//! installed, and mock modifiers that record how the stack drives them.

pub mod app;
pub mod mocks;
pub mod rig;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use app::{ik_test_app, ik_test_app_with_rigs};
pub use mocks::{PinModifier, RecordingModifier};
pub use rig::{TestRig, TestRig2D, TestRig3D, chain_2d, chain_3d};
