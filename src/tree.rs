//! Arena-based scene node storage with lazy, epoch-based invalidation.
//!
//! The tree owns every node exclusively. Nodes refer to each other (and to
//! textures) through generational handles only, so destroying a subtree
//! while other code still holds ids is safe: stale ids are simply ignored.
//!
//! ## Key Features
//!
//! - **Generational Indices**: NodeId contains index + generation to prevent
//!   ABA problems (detecting stale references to reallocated slots).
//!
//! - **Dense Storage**: Nodes stored contiguously for cache-friendly iteration.
//!
//! - **Sparse Map**: O(1) lookup from stable NodeId to dense array index.
//!
//! - **Swap-Remove**: O(1) removal without creating holes in dense storage.
//!
//! - **Dirty Epochs**: A property write only stamps the written node with a
//!   fresh value of the tree-wide epoch counter. A node's cached world state
//!   is valid while the maximum stamp along its ancestor chain equals the
//!   stamp recorded at its last computation, so descendants are recomputed
//!   on demand during the next traversal without an eager subtree walk.

use std::collections::HashSet;

use crate::error::StructuralError;
use crate::geometry::Rect;
use crate::node::{DirtyKind, NodeProperty, NodeProps};
use crate::paint::{Color, CornerColors, Shader};
use crate::pivot::Pivot;
use crate::texture::TextureId;
use crate::transform::Transform;

/// Unique identifier for a node in the scene tree.
///
/// Uses a generational index design:
/// - `index`: Position in the sparse array (reusable after removal)
/// - `generation`: Version counter that increments when a slot is reused
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Raw slot index (for diagnostics only).
    pub fn index(self) -> u32 {
        self.index
    }

    /// Combines generation (high bits) with index (low bits).
    pub fn as_u64(self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }
}

/// Entry in the sparse map, pointing to a dense array slot.
struct SparseEntry {
    dense_index: usize,
    generation: u32,
}

/// A node in the tree: its properties, relations and cached world state.
struct Node {
    id: NodeId,
    props: NodeProps,
    parent: Option<NodeId>,
    /// Insertion order; paint order is derived by a stable z-index sort
    children: Vec<NodeId>,
    texture: Option<TextureId>,
    /// Offscreen target owned by this node while it renders to texture
    render_target: Option<TextureId>,
    /// Epoch of the last local transform or structural change
    transform_stamp: u64,
    /// Epoch of the last paint change
    paint_stamp: u64,
    /// Ancestor-chain stamp the cached world state was computed from (0 = never)
    world_stamp: u64,
    world_transform: Transform,
    world_bound: Rect,
    /// Clip applied to this node's own quad (screen space)
    clip: Option<Rect>,
    /// Clip handed down to children
    child_clip: Option<Rect>,
    /// Frame and position at which the node was last emitted
    painted: Option<(u64, u32)>,
    /// Back-pointer to sparse array index (for swap-remove fixup)
    sparse_index: u32,
}

/// Resources held by a node at the moment it was destroyed.
///
/// The caller is responsible for releasing them; the tree holds no
/// reference to the texture manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyedNode {
    pub id: NodeId,
    pub texture: Option<TextureId>,
    pub render_target: Option<TextureId>,
}

/// The scene graph.
///
/// Created with a single root node sized to the viewport. Every other node
/// has exactly one parent at all times.
pub struct SceneTree {
    dense: Vec<Node>,
    sparse: Vec<Option<SparseEntry>>,
    free_indices: Vec<u32>,
    root: NodeId,
    /// Tree-wide monotonically increasing change counter
    epoch: u64,
    /// Epoch covered by the last completed traversal
    rendered_epoch: u64,
    /// Number of completed traversals
    frame: u64,
    /// Nodes whose transform changed since the spatial index last synced
    moved: HashSet<NodeId>,
    /// World-state recomputations since the last call to `take_recomputed`
    recomputed: u64,
}

impl SceneTree {
    /// Create a tree whose root covers `width x height`.
    pub fn new(width: f32, height: f32) -> Self {
        let mut tree = Self {
            dense: Vec::new(),
            sparse: Vec::new(),
            free_indices: Vec::new(),
            root: NodeId::new(0, 0),
            epoch: 0,
            rendered_epoch: 0,
            frame: 0,
            moved: HashSet::new(),
            recomputed: 0,
        };
        let mut props = NodeProps::rect(0.0, 0.0, width, height);
        props.colors = CornerColors::solid(Color::TRANSPARENT);
        tree.root = tree.register(props, None);
        tree
    }

    /// The root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    fn bump(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// Allocate a slot for a node and return its id.
    fn register(&mut self, mut props: NodeProps, parent: Option<NodeId>) -> NodeId {
        let (sparse_index, generation) = if let Some(idx) = self.free_indices.pop() {
            let old_gen = self.sparse[idx as usize]
                .as_ref()
                .map(|e| e.generation)
                .unwrap_or(0);
            (idx, old_gen.wrapping_add(1))
        } else {
            let idx = self.sparse.len() as u32;
            self.sparse.push(None);
            (idx, 0)
        };

        let id = NodeId::new(sparse_index, generation);
        let stamp = self.bump();
        props.alpha = props.alpha.clamp(0.0, 1.0);

        let dense_index = self.dense.len();
        self.dense.push(Node {
            id,
            props,
            parent,
            children: Vec::new(),
            texture: None,
            render_target: None,
            transform_stamp: stamp,
            paint_stamp: stamp,
            world_stamp: 0,
            world_transform: Transform::IDENTITY,
            world_bound: Rect::ZERO,
            clip: None,
            child_clip: None,
            painted: None,
            sparse_index,
        });

        self.sparse[sparse_index as usize] = Some(SparseEntry {
            dense_index,
            generation,
        });
        self.moved.insert(id);

        id
    }

    /// Remove a single node's slot. Relations must already be detached.
    fn unregister(&mut self, id: NodeId) -> Option<Node> {
        let dense_index = self.get_dense_index(id)?;
        let last_dense_index = self.dense.len() - 1;

        let removed = self.dense.swap_remove(dense_index);

        // Fix up the moved node's sparse entry (if we didn't remove the last element)
        if dense_index != last_dense_index {
            let moved_sparse_idx = self.dense[dense_index].sparse_index;
            if let Some(ref mut entry) = self.sparse[moved_sparse_idx as usize] {
                entry.dense_index = dense_index;
            }
        }

        // Keep the generation around so the next allocation can bump it
        self.sparse[id.index as usize] = Some(SparseEntry {
            dense_index: usize::MAX,
            generation: id.generation,
        });
        self.free_indices.push(id.index);
        self.moved.remove(&id);

        Some(removed)
    }

    fn get_dense_index(&self, id: NodeId) -> Option<usize> {
        self.sparse
            .get(id.index as usize)
            .and_then(|e| e.as_ref())
            .filter(|e| e.generation == id.generation && e.dense_index != usize::MAX)
            .map(|e| e.dense_index)
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.get_dense_index(id).map(|idx| &self.dense[idx])
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let idx = self.get_dense_index(id)?;
        Some(&mut self.dense[idx])
    }

    /// Check if a node is alive.
    pub fn contains(&self, id: NodeId) -> bool {
        self.get_dense_index(id).is_some()
    }

    /// Number of live nodes, including the root.
    pub fn node_count(&self) -> usize {
        self.dense.len()
    }

    /// Create a node and append it to `parent`'s children.
    pub fn create_node(&mut self, parent: NodeId, props: NodeProps) -> Result<NodeId, StructuralError> {
        if !self.contains(parent) {
            return Err(StructuralError::UnknownNode(parent));
        }
        let id = self.register(props, Some(parent));
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.push(id);
        }
        Ok(id)
    }

    /// Move `node` under `new_parent`, at `index` among its children (or last).
    ///
    /// Rejects cycles: the tree is left exactly as it was, including the
    /// epoch counter.
    pub fn reparent(
        &mut self,
        node: NodeId,
        new_parent: NodeId,
        index: Option<usize>,
    ) -> Result<(), StructuralError> {
        if !self.contains(node) {
            return Err(StructuralError::UnknownNode(node));
        }
        if !self.contains(new_parent) {
            return Err(StructuralError::UnknownNode(new_parent));
        }
        if node == self.root {
            return Err(StructuralError::RootCannotBeReparented);
        }
        if node == new_parent {
            return Err(StructuralError::SelfParent(node));
        }
        if self.is_ancestor(node, new_parent) {
            return Err(StructuralError::Cycle { node, new_parent });
        }

        // Detach from the old parent first
        if let Some(old_parent) = self.node(node).and_then(|n| n.parent) {
            if let Some(old) = self.node_mut(old_parent) {
                old.children.retain(|&c| c != node);
            }
        }

        if let Some(parent_node) = self.node_mut(new_parent) {
            let at = index
                .unwrap_or(parent_node.children.len())
                .min(parent_node.children.len());
            parent_node.children.insert(at, node);
        }

        let stamp = self.bump();
        if let Some(n) = self.node_mut(node) {
            n.parent = Some(new_parent);
            n.transform_stamp = stamp;
        }
        self.moved.insert(node);
        Ok(())
    }

    /// Whether `ancestor` is `node` itself or appears on its parent chain.
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).and_then(|n| n.parent);
        }
        false
    }

    /// Destroy `id` and its whole subtree, children first.
    ///
    /// Returns every destroyed node exactly once, in destruction order, with
    /// the resource handles it held so the caller can release them.
    pub fn destroy(&mut self, id: NodeId) -> Result<Vec<DestroyedNode>, StructuralError> {
        if id == self.root {
            return Err(StructuralError::RootCannotBeDestroyed);
        }
        if !self.contains(id) {
            return Err(StructuralError::UnknownNode(id));
        }

        // Detach the subtree root from its parent before tearing it down
        if let Some(parent) = self.node(id).and_then(|n| n.parent) {
            if let Some(p) = self.node_mut(parent) {
                p.children.retain(|&c| c != id);
            }
        }

        let mut destroyed = Vec::new();
        self.destroy_recursive(id, &mut destroyed);
        self.bump();
        Ok(destroyed)
    }

    fn destroy_recursive(&mut self, id: NodeId, out: &mut Vec<DestroyedNode>) {
        let children = match self.node_mut(id) {
            Some(node) => std::mem::take(&mut node.children),
            None => return,
        };
        for child in children {
            if let Some(c) = self.node_mut(child) {
                c.parent = None;
            }
            self.destroy_recursive(child, out);
        }
        if let Some(node) = self.unregister(id) {
            out.push(DestroyedNode {
                id,
                texture: node.texture,
                render_target: node.render_target,
            });
        }
    }

    /// Get the parent of a node.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Children in insertion order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Append the children of `id` to `out` in paint order: a stable sort by
    /// z-index, so equal z-indices keep insertion order.
    pub fn children_in_paint_order(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let Some(node) = self.node(id) else {
            return;
        };
        let start = out.len();
        out.extend_from_slice(&node.children);
        let first_z = out[start..]
            .first()
            .and_then(|&c| self.node(c))
            .map(|c| c.props.z_index);
        let uniform = out[start..]
            .iter()
            .all(|&c| self.node(c).map(|n| n.props.z_index) == first_z);
        if !uniform {
            out[start..].sort_by_key(|&c| self.node(c).map(|n| n.props.z_index).unwrap_or(0));
        }
    }

    /// All descendants of `id` (excluding `id`) in pre-order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Local properties of a node.
    pub fn props(&self, id: NodeId) -> Option<&NodeProps> {
        self.node(id).map(|n| &n.props)
    }

    /// Write a single property.
    ///
    /// Returns which cached state was invalidated, or `None` when the node is
    /// gone or the value did not change. Writes never fail.
    pub fn set_property(&mut self, id: NodeId, property: NodeProperty) -> Option<DirtyKind> {
        let idx = self.get_dense_index(id)?;
        if !property.apply(&mut self.dense[idx].props) {
            return None;
        }

        let kind = property.dirty_kind();
        let stamp = self.bump();
        let node = &mut self.dense[idx];
        match kind {
            DirtyKind::Transform => {
                node.transform_stamp = stamp;
                self.moved.insert(id);
            }
            DirtyKind::Paint | DirtyKind::Order => node.paint_stamp = stamp,
        }
        Some(kind)
    }

    pub fn set_position(&mut self, id: NodeId, x: f32, y: f32) {
        self.set_property(id, NodeProperty::X(x));
        self.set_property(id, NodeProperty::Y(y));
    }

    pub fn set_x(&mut self, id: NodeId, x: f32) {
        self.set_property(id, NodeProperty::X(x));
    }

    pub fn set_y(&mut self, id: NodeId, y: f32) {
        self.set_property(id, NodeProperty::Y(y));
    }

    pub fn set_size(&mut self, id: NodeId, width: f32, height: f32) {
        self.set_property(id, NodeProperty::Width(width));
        self.set_property(id, NodeProperty::Height(height));
    }

    pub fn set_scale(&mut self, id: NodeId, scale: f32) {
        self.set_property(id, NodeProperty::Scale(scale));
    }

    pub fn set_rotation(&mut self, id: NodeId, radians: f32) {
        self.set_property(id, NodeProperty::Rotation(radians));
    }

    pub fn set_pivot(&mut self, id: NodeId, pivot: Pivot) {
        self.set_property(id, NodeProperty::Pivot(pivot));
    }

    pub fn set_mount(&mut self, id: NodeId, mount: Pivot) {
        self.set_property(id, NodeProperty::Mount(mount));
    }

    pub fn set_color(&mut self, id: NodeId, color: Color) {
        self.set_property(id, NodeProperty::Color(color));
    }

    pub fn set_colors(&mut self, id: NodeId, colors: CornerColors) {
        self.set_property(id, NodeProperty::Colors(colors));
    }

    pub fn set_alpha(&mut self, id: NodeId, alpha: f32) {
        self.set_property(id, NodeProperty::Alpha(alpha));
    }

    pub fn set_z_index(&mut self, id: NodeId, z_index: i32) {
        self.set_property(id, NodeProperty::ZIndex(z_index));
    }

    pub fn set_visible(&mut self, id: NodeId, visible: bool) {
        self.set_property(id, NodeProperty::Visible(visible));
    }

    pub fn set_clipping(&mut self, id: NodeId, clipping: bool) {
        self.set_property(id, NodeProperty::Clipping(clipping));
    }

    pub fn set_render_to_texture(&mut self, id: NodeId, enabled: bool) {
        self.set_property(id, NodeProperty::RenderToTexture(enabled));
    }

    pub fn set_shader(&mut self, id: NodeId, shader: Shader) {
        self.set_property(id, NodeProperty::Shader(shader));
    }

    /// Texture handle referenced by a node.
    pub fn texture(&self, id: NodeId) -> Option<TextureId> {
        self.node(id).and_then(|n| n.texture)
    }

    /// Replace the node's texture handle, returning the previous one.
    ///
    /// Reference counting is the caller's job (see `Stage::set_texture`).
    pub(crate) fn replace_texture(
        &mut self,
        id: NodeId,
        texture: Option<TextureId>,
    ) -> Option<Option<TextureId>> {
        let idx = self.get_dense_index(id)?;
        let stamp = self.bump();
        let node = &mut self.dense[idx];
        node.paint_stamp = stamp;
        Some(std::mem::replace(&mut node.texture, texture))
    }

    pub(crate) fn render_target(&self, id: NodeId) -> Option<TextureId> {
        self.node(id).and_then(|n| n.render_target)
    }

    pub(crate) fn replace_render_target(
        &mut self,
        id: NodeId,
        target: Option<TextureId>,
    ) -> Option<TextureId> {
        self.node_mut(id)
            .and_then(|n| std::mem::replace(&mut n.render_target, target))
    }

    /// Nodes that still own a render target but no longer render to texture.
    pub(crate) fn stale_render_targets(&self) -> Vec<NodeId> {
        self.dense
            .iter()
            .filter(|n| n.render_target.is_some() && !n.props.is_render_to_texture())
            .map(|n| n.id)
            .collect()
    }

    /// Recompute the world state of `id` if stale.
    ///
    /// `parent_stamp` is the effective stamp of the parent, which must already
    /// be fresh. Returns the node's own effective stamp.
    pub(crate) fn refresh_world(&mut self, id: NodeId, parent_stamp: u64) -> Option<u64> {
        let idx = self.get_dense_index(id)?;
        let stamp = parent_stamp.max(self.dense[idx].transform_stamp);
        if stamp == self.dense[idx].world_stamp {
            return Some(stamp);
        }

        let (parent_world, parent_clip) = match self.dense[idx]
            .parent
            .and_then(|p| self.get_dense_index(p))
        {
            Some(p) => (self.dense[p].world_transform, self.dense[p].child_clip),
            None => (Transform::IDENTITY, None),
        };

        let node = &mut self.dense[idx];
        node.world_transform = parent_world.then(&node.props.local_transform());
        node.world_bound = node
            .world_transform
            .transform_rect(&Rect::new(0.0, 0.0, node.props.width, node.props.height));
        node.clip = parent_clip;
        node.child_clip = if node.props.is_clipping() {
            Some(match parent_clip {
                Some(clip) => clip.intersect(&node.world_bound),
                None => node.world_bound,
            })
        } else {
            parent_clip
        };
        node.world_stamp = stamp;
        self.recomputed += 1;
        Some(stamp)
    }

    /// Bring the cached world state of `id` and its ancestors up to date.
    fn refresh_chain(&mut self, id: NodeId) -> Option<usize> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(next) = current {
            if !self.contains(next) {
                return None;
            }
            chain.push(next);
            current = self.parent(next);
        }

        let mut stamp = 0;
        for &node in chain.iter().rev() {
            stamp = self.refresh_world(node, stamp)?;
        }
        self.get_dense_index(id)
    }

    /// World transform of a node, recomputed first if any ancestor changed.
    pub fn world_transform(&mut self, id: NodeId) -> Option<Transform> {
        let idx = self.refresh_chain(id)?;
        Some(self.dense[idx].world_transform)
    }

    /// World-space axis-aligned bound of the node's box.
    pub fn world_bound(&mut self, id: NodeId) -> Option<Rect> {
        let idx = self.refresh_chain(id)?;
        Some(self.dense[idx].world_bound)
    }

    /// Effective clip for the node's own content: the intersection of all
    /// clipping ancestors' bounds, or `None` when unclipped.
    pub fn clip_rect(&mut self, id: NodeId) -> Option<Option<Rect>> {
        let idx = self.refresh_chain(id)?;
        Some(self.dense[idx].clip)
    }

    /// Cached world transform without refreshing (may be stale).
    pub(crate) fn cached_world_transform(&self, id: NodeId) -> Option<Transform> {
        self.node(id).map(|n| n.world_transform)
    }

    pub(crate) fn cached_world_bound(&self, id: NodeId) -> Option<Rect> {
        self.node(id).map(|n| n.world_bound)
    }

    /// Product of the alphas along the ancestor chain.
    pub fn world_alpha(&self, id: NodeId) -> Option<f32> {
        let mut alpha = self.node(id)?.props.alpha;
        let mut current = self.parent(id);
        while let Some(next) = current {
            let node = self.node(next)?;
            alpha *= node.props.alpha;
            current = node.parent;
        }
        Some(alpha)
    }

    /// Whether the node and all of its ancestors are visible.
    pub fn is_effectively_visible(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(next) = current {
            match self.node(next) {
                Some(n) if n.props.is_visible() => current = n.parent,
                _ => return false,
            }
        }
        true
    }

    /// True when the node's cached world transform must be recomputed.
    pub fn is_transform_dirty(&self, id: NodeId) -> bool {
        let mut stamp = 0;
        let mut current = Some(id);
        while let Some(next) = current {
            match self.node(next) {
                Some(n) => {
                    stamp = stamp.max(n.transform_stamp);
                    current = n.parent;
                }
                None => return false,
            }
        }
        self.node(id).is_some_and(|n| n.world_stamp != stamp)
    }

    /// True when the node changed paint state since the last traversal.
    pub fn is_paint_dirty(&self, id: NodeId) -> bool {
        self.node(id)
            .is_some_and(|n| n.paint_stamp > self.rendered_epoch)
    }

    /// Current value of the tree-wide change counter.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether anything changed since the last completed traversal.
    pub fn has_pending_work(&self) -> bool {
        self.epoch > self.rendered_epoch
    }

    /// Force the next frame to render without changing any node.
    pub fn request_render(&mut self) {
        self.bump();
    }

    /// Start a traversal; returns the frame number.
    pub(crate) fn begin_frame(&mut self) -> u64 {
        self.frame += 1;
        self.frame
    }

    /// Mark every change up to now as rendered.
    pub(crate) fn finish_frame(&mut self) {
        self.rendered_epoch = self.epoch;
    }

    pub(crate) fn record_painted(&mut self, id: NodeId, order: u32) {
        let frame = self.frame;
        if let Some(node) = self.node_mut(id) {
            node.painted = Some((frame, order));
        }
    }

    /// Position of the node in the last traversal's paint order, if drawn.
    pub fn last_paint_order(&self, id: NodeId) -> Option<u32> {
        self.node(id)
            .and_then(|n| n.painted)
            .filter(|&(frame, _)| frame == self.frame)
            .map(|(_, order)| order)
    }

    /// Drain the set of nodes whose transform changed since the last call.
    pub(crate) fn take_moved(&mut self) -> Vec<NodeId> {
        self.moved.drain().collect()
    }

    /// Number of world-state recomputations since the last call.
    pub(crate) fn take_recomputed(&mut self) -> u64 {
        std::mem::take(&mut self.recomputed)
    }
}
