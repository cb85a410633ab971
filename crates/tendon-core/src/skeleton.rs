//! Bone arena shared by every solver.
//!
//! A [`Skeleton`] owns its bones in a flat `Vec` indexed by [`BoneId`]. Each
//! bone stores its parent-relative (`local`) transform and a cached world
//! transform; writing either keeps the whole subtree consistent. Top-level
//! bones are relative to the skeleton root.
//!
//! ```text
//! root ──► bone 0 ──► bone 1 ──► bone 2
//!            └──────► bone 3
//! ```

use std::collections::HashMap;
use std::fmt;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::bone_forward::BoneForward;
use crate::error::SkeletonError;
use crate::pose::PoseSpace;
use crate::transform::{Affine, Transform2, Transform3};

/// Length value meaning "not set": solvers must not solve such a bone.
pub const UNSET_LENGTH: f32 = -1.0;

// ---------------------------------------------------------------------------
// BoneId
// ---------------------------------------------------------------------------

/// Index of a bone inside its skeleton.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BoneId(pub usize);

impl fmt::Display for BoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bone#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Bone
// ---------------------------------------------------------------------------

/// One rigid segment.
#[derive(Debug, Clone)]
pub struct Bone<T: Affine> {
    name: String,
    parent: Option<BoneId>,
    local: T,
    world: T,
    rest: T,
    length: f32,
    rest_angle: f32,
    auto_length: bool,
    auto_rest_angle: bool,
    pre_ik_local: Option<T>,
}

impl<T: Affine> Bone<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn parent(&self) -> Option<BoneId> {
        self.parent
    }

    /// Parent-relative transform.
    pub const fn local(&self) -> &T {
        &self.local
    }

    pub const fn world(&self) -> &T {
        &self.world
    }

    /// Parent-relative reset pose.
    pub const fn rest(&self) -> &T {
        &self.rest
    }

    /// World-space length, or [`UNSET_LENGTH`].
    pub const fn length(&self) -> f32 {
        self.length
    }

    /// `true` when the length is usable by solvers.
    pub fn has_length(&self) -> bool {
        self.length >= 0.0
    }

    /// Offset (radians) between the bone's +X axis and the direction it
    /// visually points in. Only meaningful for 2D bones.
    pub const fn rest_angle(&self) -> f32 {
        self.rest_angle
    }

    pub const fn is_ik_in_progress(&self) -> bool {
        self.pre_ik_local.is_some()
    }
}

// ---------------------------------------------------------------------------
// Skeleton
// ---------------------------------------------------------------------------

/// Root transform plus a tree of bones.
#[derive(Debug, Clone)]
pub struct Skeleton<T: Affine> {
    space: PoseSpace<T>,
    bones: Vec<Bone<T>>,
    children: Vec<Vec<BoneId>>,
    names: HashMap<String, BoneId>,
}

pub type Skeleton2D = Skeleton<Transform2>;
pub type Skeleton3D = Skeleton<Transform3>;

impl<T: Affine> Default for Skeleton<T> {
    fn default() -> Self {
        Self {
            space: PoseSpace::default(),
            bones: Vec::new(),
            children: Vec::new(),
            names: HashMap::new(),
        }
    }
}

impl<T: Affine> Skeleton<T> {
    /// Empty skeleton rooted at `root`.
    pub fn new(root: T) -> Result<Self, SkeletonError> {
        let space = PoseSpace::new(root).ok_or(SkeletonError::SingularRootTransform)?;
        Ok(Self {
            space,
            ..Self::default()
        })
    }

    // ---- Structure ----

    /// Add a bone whose rest pose is its initial `local` transform.
    pub fn add_bone(
        &mut self,
        name: impl Into<String>,
        parent: Option<BoneId>,
        local: T,
    ) -> Result<BoneId, SkeletonError> {
        let name = name.into();
        if let Some(parent) = parent {
            if parent.0 >= self.bones.len() {
                return Err(SkeletonError::UnknownParent(parent));
            }
        }
        if self.names.contains_key(&name) {
            return Err(SkeletonError::DuplicateName);
        }

        let id = BoneId(self.bones.len());
        let world = self.parent_world(parent).compose(&local);
        self.bones.push(Bone {
            name: name.clone(),
            parent,
            local,
            world,
            rest: local,
            length: UNSET_LENGTH,
            rest_angle: 0.0,
            auto_length: true,
            auto_rest_angle: true,
            pre_ik_local: None,
        });
        self.children.push(Vec::new());
        if let Some(parent) = parent {
            self.children[parent.0].push(id);
        }
        self.names.insert(name, id);
        Ok(id)
    }

    /// Move a bone under a new parent, keeping its world transform.
    pub fn set_parent(
        &mut self,
        id: BoneId,
        parent: Option<BoneId>,
    ) -> Result<(), SkeletonError> {
        self.bone(id)?;
        if let Some(parent) = parent {
            self.bone(parent).map_err(|_| SkeletonError::UnknownParent(parent))?;
            // Walk up from the new parent; reaching `id` would close a loop.
            let mut cursor = Some(parent);
            while let Some(current) = cursor {
                if current == id {
                    return Err(SkeletonError::CyclicParent(id));
                }
                cursor = self.bones[current.0].parent;
            }
        }
        let world = self.bones[id.0].world;
        self.bones[id.0].parent = parent;
        self.rebuild_children_index();
        self.set_world_transform(id, world)
    }

    /// Recompute the parent → children index from the parent links.
    pub fn rebuild_children_index(&mut self) {
        for list in &mut self.children {
            list.clear();
        }
        for (index, bone) in self.bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                self.children[parent.0].push(BoneId(index));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn bone(&self, id: BoneId) -> Result<&Bone<T>, SkeletonError> {
        self.bones.get(id.0).ok_or(SkeletonError::UnknownBone(id))
    }

    pub fn find_bone(&self, name: &str) -> Option<BoneId> {
        self.names.get(name).copied()
    }

    pub fn bones(&self) -> impl Iterator<Item = (BoneId, &Bone<T>)> {
        self.bones.iter().enumerate().map(|(i, b)| (BoneId(i), b))
    }

    pub fn children(&self, id: BoneId) -> &[BoneId] {
        self.children.get(id.0).map_or(&[][..], Vec::as_slice)
    }

    pub fn first_child(&self, id: BoneId) -> Option<BoneId> {
        self.children(id).first().copied()
    }

    /// Bones without a parent bone.
    pub fn roots(&self) -> impl Iterator<Item = BoneId> + '_ {
        self.bones()
            .filter(|(_, b)| b.parent.is_none())
            .map(|(id, _)| id)
    }

    // ---- Root ----

    pub fn root_transform(&self) -> &T {
        self.space.root()
    }

    /// Replace the root. Bones keep their local transforms and move with it.
    pub fn set_root_transform(&mut self, root: T) -> Result<(), SkeletonError> {
        self.space = PoseSpace::new(root).ok_or(SkeletonError::SingularRootTransform)?;
        let roots: Vec<BoneId> = self.roots().collect();
        for id in roots {
            self.update_subtree(id);
        }
        Ok(())
    }

    /// Converter for the current root.
    pub const fn pose_space(&self) -> &PoseSpace<T> {
        &self.space
    }

    // ---- Transforms ----

    pub fn world_transform(&self, id: BoneId) -> Result<T, SkeletonError> {
        Ok(self.bone(id)?.world)
    }

    pub fn local_transform(&self, id: BoneId) -> Result<T, SkeletonError> {
        Ok(self.bone(id)?.local)
    }

    /// Write a world transform and carry the subtree along.
    pub fn set_world_transform(&mut self, id: BoneId, world: T) -> Result<(), SkeletonError> {
        let parent = self.bone(id)?.parent;
        let local = self
            .parent_world(parent)
            .try_affine_inverse()
            .ok_or(SkeletonError::SingularTransform(id))?
            .compose(&world);
        self.bones[id.0].local = local;
        self.update_subtree(id);
        Ok(())
    }

    pub fn set_local_transform(&mut self, id: BoneId, local: T) -> Result<(), SkeletonError> {
        self.bone(id)?;
        self.bones[id.0].local = local;
        self.update_subtree(id);
        Ok(())
    }

    /// Transform relative to the skeleton root.
    pub fn global_pose(&self, id: BoneId) -> Result<T, SkeletonError> {
        Ok(self.space.to_pose(&self.bone(id)?.world))
    }

    pub fn set_global_pose(&mut self, id: BoneId, pose: T) -> Result<(), SkeletonError> {
        self.set_world_transform(id, self.space.to_world(&pose))
    }

    /// World transform the bone would have if every bone were at rest.
    pub fn rest_world_transform(&self, id: BoneId) -> Result<T, SkeletonError> {
        Ok(self.space.to_world(&self.rest_global_pose(id)?))
    }

    /// Rest transform relative to the skeleton root.
    pub fn rest_global_pose(&self, id: BoneId) -> Result<T, SkeletonError> {
        let mut pose = self.bone(id)?.rest;
        let mut cursor = self.bones[id.0].parent;
        while let Some(parent) = cursor {
            let bone = &self.bones[parent.0];
            pose = bone.rest.compose(&pose);
            cursor = bone.parent;
        }
        Ok(pose)
    }

    /// Replace the rest pose of one bone.
    pub fn set_rest(&mut self, id: BoneId, rest: T) -> Result<(), SkeletonError> {
        self.bone(id)?;
        self.bones[id.0].rest = rest;
        Ok(())
    }

    /// Put every bone back at its rest pose.
    pub fn reset_to_rest(&mut self) {
        for bone in &mut self.bones {
            bone.local = bone.rest;
        }
        let roots: Vec<BoneId> = self.roots().collect();
        for id in roots {
            self.update_subtree(id);
        }
    }

    // ---- Setup ----

    /// Fix the length, turning off automatic length calculation.
    pub fn set_bone_length(&mut self, id: BoneId, length: f32) -> Result<(), SkeletonError> {
        self.bone(id)?;
        let bone = &mut self.bones[id.0];
        bone.length = length;
        bone.auto_length = false;
        Ok(())
    }

    /// Fix the rest angle, turning off automatic rest angle calculation.
    pub fn set_rest_angle(&mut self, id: BoneId, angle: f32) -> Result<(), SkeletonError> {
        self.bone(id)?;
        let bone = &mut self.bones[id.0];
        bone.rest_angle = angle;
        bone.auto_rest_angle = false;
        Ok(())
    }

    /// Distance to the first child bone, or [`UNSET_LENGTH`] for a leaf.
    pub fn auto_calculate_length(&mut self, id: BoneId) -> Result<f32, SkeletonError> {
        self.bone(id)?;
        Ok(self.calculate_length_at(id.0))
    }

    /// Recompute lengths for every bone still on automatic length.
    pub fn auto_calculate_lengths(&mut self) {
        for index in 0..self.bones.len() {
            if self.bones[index].auto_length {
                self.calculate_length_at(index);
            }
        }
    }

    fn calculate_length_at(&mut self, index: usize) -> f32 {
        let origin = self.bones[index].world;
        let length = self
            .first_child(BoneId(index))
            .map_or(UNSET_LENGTH, |child| origin.origin_distance(&self.bones[child.0].world));
        self.bones[index].length = length;
        length
    }

    /// Length in pose-space units (world length divided by root scale).
    pub fn pose_length(&self, id: BoneId) -> Result<f32, SkeletonError> {
        let length = self.bone(id)?.length;
        let scale = self.space.root().forward_axis_scale();
        if scale <= f32::EPSILON {
            return Ok(length);
        }
        Ok(length / scale)
    }

    // ---- IK-in-progress hint ----

    /// Mark a bone as driven by IK this tick. The first call caches the
    /// animated local pose so [`Self::restore_pre_ik_poses`] can undo it.
    pub fn notify_ik_in_progress(&mut self, id: BoneId, active: bool) -> Result<(), SkeletonError> {
        self.bone(id)?;
        let bone = &mut self.bones[id.0];
        match (active, bone.pre_ik_local.is_some()) {
            (true, false) => bone.pre_ik_local = Some(bone.local),
            (false, _) => bone.pre_ik_local = None,
            (true, true) => {}
        }
        Ok(())
    }

    /// Restore every IK-driven bone to its cached pre-IK pose and clear the
    /// hints. Returns how many bones were restored.
    pub fn restore_pre_ik_poses(&mut self) -> usize {
        let mut restored = 0;
        for bone in &mut self.bones {
            if let Some(local) = bone.pre_ik_local.take() {
                bone.local = local;
                restored += 1;
            }
        }
        if restored > 0 {
            let roots: Vec<BoneId> = self.roots().collect();
            for id in roots {
                self.update_subtree(id);
            }
        }
        restored
    }

    /// Drop the hints without touching poses.
    pub fn clear_ik_flags(&mut self) {
        for bone in &mut self.bones {
            bone.pre_ik_local = None;
        }
    }

    // ---- Internal ----

    fn parent_world(&self, parent: Option<BoneId>) -> T {
        parent.map_or(*self.space.root(), |p| self.bones[p.0].world)
    }

    fn update_subtree(&mut self, id: BoneId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let parent = self.bones[current.0].parent;
            let world = self.parent_world(parent).compose(&self.bones[current.0].local);
            self.bones[current.0].world = world;
            stack.extend_from_slice(&self.children[current.0]);
        }
    }
}

// ---------------------------------------------------------------------------
// 2D setup
// ---------------------------------------------------------------------------

impl Skeleton<Transform2> {
    /// Angle of the first child's position in this bone's frame, or 0.
    pub fn auto_calculate_rest_angle(&mut self, id: BoneId) -> Result<f32, SkeletonError> {
        self.bone(id)?;
        Ok(self.calculate_rest_angle_at(id.0))
    }

    /// Recompute automatic lengths and rest angles. Call after structural
    /// changes, not every tick.
    pub fn auto_setup(&mut self) {
        self.auto_calculate_lengths();
        for index in 0..self.bones.len() {
            if self.bones[index].auto_rest_angle {
                self.calculate_rest_angle_at(index);
            }
        }
    }

    fn calculate_rest_angle_at(&mut self, index: usize) -> f32 {
        let angle = self.first_child(BoneId(index)).map_or(0.0, |child| {
            let offset = self.bones[child.0].local.origin;
            offset.y.atan2(offset.x)
        });
        self.bones[index].rest_angle = angle;
        angle
    }
}

// ---------------------------------------------------------------------------
// 3D setup
// ---------------------------------------------------------------------------

impl Skeleton<Transform3> {
    /// Recompute automatic lengths.
    pub fn auto_setup(&mut self) {
        self.auto_calculate_lengths();
    }

    /// Guess the forward axis a host rig was authored with from where child
    /// bones sit in their parents' rest frames.
    pub fn detect_bone_forward(&self) -> Option<BoneForward> {
        let offsets: Vec<Vector3<f32>> = self
            .bones()
            .filter_map(|(id, _)| self.first_child(id))
            .map(|child| self.bones[child.0].rest.origin)
            .collect();
        BoneForward::detect(offsets)
    }
}
