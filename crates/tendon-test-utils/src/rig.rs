//! Straight-chain rigs for solver tests.
//!
//! Every chain ends in a zero-length `end` leaf so the last real bone gets
//! its length from [`Skeleton::auto_setup`].

use nalgebra::{Vector2, Vector3};
use tendon_core::config::StackConfig;
use tendon_core::scene::SceneGraph;
use tendon_core::skeleton::{BoneId, Skeleton};
use tendon_core::transform::{Affine, Transform2, Transform3};
use tendon_ik::modifier::{Modifier, ModifierContext};
use tendon_ik::{IkRig, ModifierStack};

/// Path the builders register the target under.
pub const TARGET: &str = "target";

/// A skeleton, its scene and the bones in chain order (end leaf last).
#[derive(Debug, Clone)]
pub struct TestRig<T: Affine> {
    pub skeleton: Skeleton<T>,
    pub scene: SceneGraph<T>,
    pub bones: Vec<BoneId>,
}

pub type TestRig2D = TestRig<Transform2>;
pub type TestRig3D = TestRig<Transform3>;

impl<T: Affine> TestRig<T> {
    /// Bones that carry a length, i.e. everything but the end leaf.
    pub fn joints(&self) -> &[BoneId] {
        &self.bones[..self.bones.len().saturating_sub(1)]
    }

    /// The end leaf.
    pub fn end(&self) -> BoneId {
        *self.bones.last().expect("chain has an end bone")
    }

    /// World position of the end leaf.
    pub fn tip(&self) -> T::Vector {
        self.world(self.end()).origin()
    }

    pub fn world(&self, bone: BoneId) -> T {
        self.skeleton.world_transform(bone).expect("bone in rig")
    }

    /// A modifier context over this rig.
    pub fn context(&mut self, delta: f32) -> ModifierContext<'_, T> {
        ModifierContext::new(&mut self.skeleton, &mut self.scene, delta)
    }

    /// Turn this fixture into a plugin rig with an empty stack.
    pub fn into_ik_rig<M: Modifier<T> + Send + Sync + 'static>(self) -> IkRig<T, M> {
        IkRig::new(
            self.skeleton,
            self.scene,
            ModifierStack::new(StackConfig::default()),
        )
    }
}

/// Chain along +X starting at the origin.
pub fn chain_2d(lengths: &[f32]) -> TestRig2D {
    let mut skeleton = Skeleton::default();
    let mut bones = Vec::with_capacity(lengths.len() + 1);
    let mut parent = None;
    let offsets = std::iter::once(0.0).chain(lengths.iter().copied());
    for (i, offset) in offsets.enumerate() {
        let name = if i == lengths.len() {
            "end".to_string()
        } else {
            format!("bone_{i}")
        };
        let id = skeleton
            .add_bone(name, parent, Transform2::from_translation(Vector2::new(offset, 0.0)))
            .expect("fresh bone name");
        bones.push(id);
        parent = Some(id);
    }
    skeleton.auto_setup();
    TestRig {
        skeleton,
        scene: SceneGraph::new(),
        bones,
    }
}

/// Chain along -Z starting at the origin.
pub fn chain_3d(lengths: &[f32]) -> TestRig3D {
    let mut skeleton = Skeleton::default();
    let mut bones = Vec::with_capacity(lengths.len() + 1);
    let mut parent = None;
    let offsets = std::iter::once(0.0).chain(lengths.iter().copied());
    for (i, offset) in offsets.enumerate() {
        let name = if i == lengths.len() {
            "end".to_string()
        } else {
            format!("bone_{i}")
        };
        let id = skeleton
            .add_bone(
                name,
                parent,
                Transform3::from_translation(Vector3::new(0.0, 0.0, -offset)),
            )
            .expect("fresh bone name");
        bones.push(id);
        parent = Some(id);
    }
    skeleton.auto_setup();
    TestRig {
        skeleton,
        scene: SceneGraph::new(),
        bones,
    }
}

impl TestRig2D {
    /// Place (or move) the [`TARGET`] node.
    #[must_use]
    pub fn with_target(mut self, position: Vector2<f32>) -> Self {
        self.scene.insert(TARGET, Transform2::from_translation(position));
        self
    }
}

impl TestRig3D {
    /// Place (or move) the [`TARGET`] node.
    #[must_use]
    pub fn with_target(mut self, position: Vector3<f32>) -> Self {
        self.scene.insert(TARGET, Transform3::from_translation(position));
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
