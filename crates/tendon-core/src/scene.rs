//! Narrow interface to the host scene graph.
//!
//! Solvers never walk a scene tree. Targets, poles, tips and curve frames are
//! configured as [`NodeRef`]s and resolved every tick; a reference that does
//! not resolve aborts that solver for the tick instead of panicking.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::SolveError;
use crate::skeleton::{BoneId, Skeleton};
use crate::transform::Affine;

/// Opaque handle to a non-bone scene node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// A configured reference to something with a world transform.
///
/// In TOML: `target = { node = "arm/target" }` or `tip = { bone = 3 }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRef {
    /// A bone of the skeleton being solved.
    Bone(BoneId),
    /// A scene node, looked up by path.
    Node(String),
}

impl From<BoneId> for NodeRef {
    fn from(id: BoneId) -> Self {
        Self::Bone(id)
    }
}

impl From<&str> for NodeRef {
    fn from(path: &str) -> Self {
        Self::Node(path.to_owned())
    }
}

/// What the engine needs from the host scene graph.
pub trait SceneAccess<T: Affine> {
    /// Look up a node by path.
    fn resolve_reference(&self, path: &str) -> Option<NodeId>;

    fn read_world_transform(&self, node: NodeId) -> Option<T>;

    /// Returns `false` when the node no longer exists.
    fn write_world_transform(&mut self, node: NodeId, transform: T) -> bool;

    /// Hint that `bone` is being driven by IK. Hosts with an animation layer
    /// use it to avoid overwriting the bone this tick.
    fn notify_ik_in_progress(&mut self, _bone: BoneId, _active: bool) {}
}

/// Resolve a reference to a world transform, checking bones first.
pub fn resolve_world<T: Affine>(
    reference: &NodeRef,
    skeleton: &Skeleton<T>,
    scene: &dyn SceneAccess<T>,
) -> Result<T, SolveError> {
    match reference {
        NodeRef::Bone(id) => Ok(skeleton.world_transform(*id)?),
        NodeRef::Node(path) => scene
            .resolve_reference(path)
            .and_then(|node| scene.read_world_transform(node))
            .ok_or_else(|| SolveError::MissingReference(path.clone())),
    }
}

// ---------------------------------------------------------------------------
// SceneGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SceneNode<T> {
    path: String,
    world: T,
    alive: bool,
}

/// Flat, path-indexed scene for hosts without their own graph.
#[derive(Debug, Clone)]
pub struct SceneGraph<T: Affine> {
    nodes: Vec<SceneNode<T>>,
    index: HashMap<String, NodeId>,
    ik_hints: HashMap<BoneId, bool>,
}

impl<T: Affine> Default for SceneGraph<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            ik_hints: HashMap::new(),
        }
    }
}

impl<T: Affine> SceneGraph<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node at `path`.
    pub fn insert(&mut self, path: impl Into<String>, world: T) -> NodeId {
        let path = path.into();
        if let Some(&id) = self.index.get(&path) {
            let node = &mut self.nodes[id.0 as usize];
            node.world = world;
            node.alive = true;
            return id;
        }
        let id = NodeId(self.nodes.len() as u64);
        self.nodes.push(SceneNode {
            path: path.clone(),
            world,
            alive: true,
        });
        self.index.insert(path, id);
        id
    }

    /// Remove a node; later lookups of its path fail.
    pub fn remove(&mut self, path: &str) -> bool {
        match self.index.remove(path) {
            Some(id) => {
                self.nodes[id.0 as usize].alive = false;
                true
            }
            None => false,
        }
    }

    /// Move an existing node. Returns `false` if `path` is unknown.
    pub fn set_world(&mut self, path: &str, world: T) -> bool {
        match self.index.get(path) {
            Some(&id) => self.write_world_transform(id, world),
            None => false,
        }
    }

    pub fn world(&self, path: &str) -> Option<T> {
        let id = self.resolve_reference(path)?;
        self.read_world_transform(id)
    }

    pub fn path(&self, node: NodeId) -> Option<&str> {
        self.nodes
            .get(node.0 as usize)
            .filter(|n| n.alive)
            .map(|n| n.path.as_str())
    }

    /// Last hint received for `bone`.
    pub fn ik_hint(&self, bone: BoneId) -> Option<bool> {
        self.ik_hints.get(&bone).copied()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl<T: Affine> SceneAccess<T> for SceneGraph<T> {
    fn resolve_reference(&self, path: &str) -> Option<NodeId> {
        self.index.get(path).copied()
    }

    fn read_world_transform(&self, node: NodeId) -> Option<T> {
        self.nodes
            .get(node.0 as usize)
            .filter(|n| n.alive)
            .map(|n| n.world)
    }

    fn write_world_transform(&mut self, node: NodeId, transform: T) -> bool {
        match self.nodes.get_mut(node.0 as usize) {
            Some(n) if n.alive => {
                n.world = transform;
                true
            }
            _ => false,
        }
    }

    fn notify_ik_in_progress(&mut self, bone: BoneId, active: bool) {
        self.ik_hints.insert(bone, active);
    }
}
