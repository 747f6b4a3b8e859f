//! Scene traversal producing the frame's render-target passes and draw batches.
//!
//! The tree is walked depth-first in paint order. World state is refreshed
//! on the way down, invisible and fully clipped subtrees are skipped, and
//! nodes flagged for render-to-texture get their subtree drawn into an
//! offscreen target first and composited as one quad.

use crate::events::Diagnostic;
use crate::error::TextureError;
use crate::geometry::Rect;
use crate::node::NodeProps;
use crate::paint::{Color, ShaderKey};
use crate::render_stats::TraversalCounts;
use crate::texture::{Renderable, TextureId, TextureManager};
use crate::transform::Transform;
use crate::tree::{NodeId, SceneTree};

use super::quad::{QuadDescriptor, QuadInstance, FULL_UV};

/// Alpha below which a subtree contributes nothing visible.
const MIN_ALPHA: f32 = 1.0 / 255.0;

/// Quads sharing a texture and shader, drawn with one call.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawBatch {
    pub texture: Option<TextureId>,
    pub shader: ShaderKey,
    pub quads: Vec<QuadDescriptor>,
}

impl DrawBatch {
    pub fn instances(&self) -> Vec<QuadInstance> {
        self.quads.iter().map(QuadDescriptor::to_instance).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// Start drawing into `target`, or into the screen when `None`
    BeginTarget {
        target: Option<TextureId>,
        width: u32,
        height: u32,
        clear: Color,
    },
    Draw(DrawBatch),
    EndTarget,
}

/// Everything the renderer needs to draw one frame.
///
/// Offscreen passes come first, innermost first, so every target is
/// complete before a later pass samples it. The screen pass is last.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameBatch {
    pub frame: u64,
    pub ops: Vec<BatchOp>,
}

impl FrameBatch {
    /// All quads across every pass, in submission order.
    pub fn quads(&self) -> impl Iterator<Item = &QuadDescriptor> {
        self.ops.iter().flat_map(|op| match op {
            BatchOp::Draw(batch) => batch.quads.as_slice(),
            _ => &[],
        })
    }

    /// Quads drawn directly to the screen, in paint order.
    pub fn screen_quads(&self) -> Vec<&QuadDescriptor> {
        let mut out = Vec::new();
        let mut in_screen = false;
        for op in &self.ops {
            match op {
                BatchOp::BeginTarget { target, .. } => in_screen = target.is_none(),
                BatchOp::Draw(batch) if in_screen => out.extend(batch.quads.iter()),
                _ => {}
            }
        }
        out
    }

    pub fn quad_for(&self, node: NodeId) -> Option<&QuadDescriptor> {
        self.quads().find(|q| q.node == node)
    }

    pub fn draw_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, BatchOp::Draw(_)))
            .count()
    }

    pub fn render_targets(&self) -> Vec<TextureId> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                BatchOp::BeginTarget {
                    target: Some(t), ..
                } => Some(*t),
                _ => None,
            })
            .collect()
    }
}

/// Result of one traversal.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuildOutput {
    pub batch: FrameBatch,
    pub counts: TraversalCounts,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct Batcher {
    viewport: Rect,
    bounds_margin: f32,
    reorder_window: usize,
    clear_color: Color,
}

/// Coordinate space of the pass currently being filled.
#[derive(Debug, Clone, Copy)]
struct Space {
    /// Maps world space into target space; `None` for the screen
    to_target: Option<Transform>,
    /// Region outside which quads are culled
    cull: Rect,
    /// Clip applied to the next node's own quad
    clip: Option<Rect>,
    alpha: f32,
}

/// Traversal state shared by every pass of one frame.
struct Pass<'a> {
    tree: &'a mut SceneTree,
    textures: &'a mut TextureManager,
    reorder_window: usize,
    ops: Vec<BatchOp>,
    diagnostics: Vec<Diagnostic>,
    counts: TraversalCounts,
    paint_order: u32,
    /// A render target could not be allocated; the next tick retries it
    retry: bool,
}

impl Batcher {
    pub fn new(viewport: Rect, bounds_margin: f32, reorder_window: usize) -> Self {
        Self {
            viewport,
            bounds_margin,
            reorder_window,
            clear_color: Color::BLACK,
        }
    }

    pub fn with_clear_color(mut self, color: Color) -> Self {
        self.clear_color = color;
        self
    }

    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
    }

    /// Walk the tree and produce this frame's batch.
    pub fn build(&mut self, tree: &mut SceneTree, textures: &mut TextureManager) -> BuildOutput {
        let frame = tree.begin_frame();
        textures.begin_frame(frame);

        for node in tree.stale_render_targets() {
            if let Some(target) = tree.replace_render_target(node, None) {
                textures.release(target);
            }
        }

        let mut pass = Pass {
            tree,
            textures,
            reorder_window: self.reorder_window,
            ops: Vec::new(),
            diagnostics: Vec::new(),
            counts: TraversalCounts::default(),
            paint_order: 0,
            retry: false,
        };

        let screen = Space {
            to_target: None,
            cull: self.viewport.inflate(self.bounds_margin),
            clip: None,
            alpha: 1.0,
        };
        let root = pass.tree.root();
        let mut quads = Vec::new();
        pass.visit(root, 0, screen, &mut quads);
        pass.flush(
            None,
            self.viewport.width.ceil() as u32,
            self.viewport.height.ceil() as u32,
            self.clear_color,
            quads,
        );

        let Pass {
            tree,
            ops,
            diagnostics,
            mut counts,
            retry,
            ..
        } = pass;
        counts.nodes_recomputed = tree.take_recomputed();
        tree.finish_frame();
        if retry {
            tree.request_render();
        }

        BuildOutput {
            batch: FrameBatch { frame, ops },
            counts,
            diagnostics,
        }
    }
}

impl Pass<'_> {
    fn visit(
        &mut self,
        id: NodeId,
        parent_stamp: u64,
        space: Space,
        quads: &mut Vec<QuadDescriptor>,
    ) {
        let Some(stamp) = self.tree.refresh_world(id, parent_stamp) else {
            return;
        };
        self.counts.nodes_visited += 1;

        let Some(props) = self.tree.props(id).cloned() else {
            return;
        };
        let alpha = space.alpha * props.alpha;
        if !props.is_visible() || alpha < MIN_ALPHA {
            self.counts.nodes_culled += 1;
            return;
        }

        let Some(world) = self.tree.cached_world_transform(id) else {
            return;
        };
        let transform = match space.to_target {
            Some(to_target) => to_target.then(&world),
            None => world,
        };
        let local = Rect::new(0.0, 0.0, props.width, props.height);
        let bound = transform.transform_rect(&local);

        let child_clip = if props.is_clipping() {
            let clip = match space.clip {
                Some(clip) => clip.intersect(&bound),
                None => bound,
            };
            // Nothing below a clip can reach pixels outside it.
            if clip.is_empty() || !clip.intersects(&space.cull) {
                self.counts.nodes_culled += 1;
                return;
            }
            Some(clip)
        } else {
            space.clip
        };

        // Unclipped children may lie anywhere, so only the own quad is culled.
        let own_visible = bound.intersects(&space.cull)
            && space.clip.map_or(true, |clip| bound.intersects(&clip));

        if props.is_render_to_texture() {
            // The subtree is only seen through the composite quad.
            if !own_visible {
                self.counts.nodes_culled += 1;
                return;
            }
            self.visit_render_target(id, stamp, &props, transform, alpha, space, quads);
            return;
        }

        if own_visible {
            if let Some(quad) = self.own_quad(id, &props, transform, alpha, space.clip, bound) {
                quads.push(quad);
                self.record(id);
            }
        } else {
            self.counts.nodes_culled += 1;
        }

        let mut children = Vec::new();
        self.tree.children_in_paint_order(id, &mut children);
        let child_space = Space {
            clip: child_clip,
            alpha,
            ..space
        };
        for child in children {
            self.visit(child, stamp, child_space, quads);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn visit_render_target(
        &mut self,
        id: NodeId,
        stamp: u64,
        props: &NodeProps,
        transform: Transform,
        alpha: f32,
        space: Space,
        quads: &mut Vec<QuadDescriptor>,
    ) {
        let width = props.width.ceil().max(0.0) as u32;
        let height = props.height.ceil().max(0.0) as u32;
        let Some(world) = self.tree.cached_world_transform(id) else {
            return;
        };
        let Some(to_target) = world.inverse() else {
            self.counts.nodes_culled += 1;
            return;
        };

        let target = match self.render_target(id, width, height) {
            Ok(target) => target,
            Err(error) => {
                log::warn!("Skipping render-to-texture subtree of {id:?}: {error}");
                self.counts.render_targets_failed += 1;
                self.diagnostics.push(Diagnostic::RenderTarget { node: id, error });
                self.retry = true;
                return;
            }
        };

        let target_rect = Rect::new(0.0, 0.0, width as f32, height as f32);
        let target_space = Space {
            to_target: Some(to_target),
            cull: target_rect,
            clip: Some(target_rect),
            alpha: 1.0,
        };
        let mut children = Vec::new();
        self.tree.children_in_paint_order(id, &mut children);
        let mut target_quads = Vec::new();
        for child in children {
            self.visit(child, stamp, target_space, &mut target_quads);
        }
        self.flush(Some(target), width, height, Color::TRANSPARENT, target_quads);
        self.counts.render_targets_rendered += 1;
        self.textures.touch(target);

        quads.push(QuadDescriptor {
            node: id,
            transform,
            width: props.width,
            height: props.height,
            colors: props.colors,
            alpha,
            texture: Some(target),
            uv: FULL_UV,
            shader: props.shader,
            clip: space.clip,
            bound: transform.transform_rect(&Rect::new(0.0, 0.0, props.width, props.height)),
        });
        self.record(id);
    }

    /// Reuse the node's target while its pixel size is unchanged.
    fn render_target(
        &mut self,
        id: NodeId,
        width: u32,
        height: u32,
    ) -> Result<TextureId, TextureError> {
        if let Some(existing) = self.tree.render_target(id) {
            let reusable = self.textures.resource(existing).is_some_and(|r| {
                r.dimensions() == (width, height) && r.state().is_loaded()
            });
            if reusable {
                return Ok(existing);
            }
            self.tree.replace_render_target(id, None);
            self.textures.release(existing);
        }
        let target = self.textures.allocate_render_target(width, height)?;
        self.tree.replace_render_target(id, Some(target));
        Ok(target)
    }

    fn own_quad(
        &mut self,
        id: NodeId,
        props: &NodeProps,
        transform: Transform,
        alpha: f32,
        clip: Option<Rect>,
        bound: Rect,
    ) -> Option<QuadDescriptor> {
        let texture = match self.tree.texture(id) {
            Some(texture) => match self.textures.renderable(texture) {
                Renderable::Ready => {
                    self.textures.touch(texture);
                    Some(texture)
                }
                Renderable::Failed => None,
                Renderable::Pending => return None,
            },
            None => None,
        };
        if texture.is_none() && props.colors.is_transparent() {
            return None;
        }

        Some(QuadDescriptor {
            node: id,
            transform,
            width: props.width,
            height: props.height,
            colors: props.colors,
            alpha,
            texture,
            uv: FULL_UV,
            shader: props.shader,
            clip,
            bound,
        })
    }

    fn record(&mut self, id: NodeId) {
        self.tree.record_painted(id, self.paint_order);
        self.paint_order += 1;
        self.counts.quads_emitted += 1;
    }

    /// Coalesce a finished pass and append it to the op list.
    fn flush(
        &mut self,
        target: Option<TextureId>,
        width: u32,
        height: u32,
        clear: Color,
        quads: Vec<QuadDescriptor>,
    ) {
        let (batches, moved) = coalesce(quads, self.reorder_window);
        self.counts.quads_coalesced += moved as u64;
        self.counts.draw_batches += batches.len() as u64;

        self.ops.push(BatchOp::BeginTarget {
            target,
            width,
            height,
            clear,
        });
        self.ops.extend(batches.into_iter().map(BatchOp::Draw));
        self.ops.push(BatchOp::EndTarget);
    }
}

/// Group quads into draw batches.
///
/// A quad may move up to `window` positions earlier to join a quad with the
/// same batch key, but never past a quad its bound overlaps. Returns the
/// batches and the number of quads that moved.
pub fn coalesce(quads: Vec<QuadDescriptor>, window: usize) -> (Vec<DrawBatch>, usize) {
    let mut ordered: Vec<QuadDescriptor> = Vec::with_capacity(quads.len());
    let mut moved = 0;

    for quad in quads {
        let key = quad.batch_key();
        let visible = quad.visible_bound();
        let floor = ordered.len().saturating_sub(window);
        let mut insert_at = None;

        for k in (floor..ordered.len()).rev() {
            let other = &ordered[k];
            if other.batch_key() == key {
                insert_at = Some(k + 1);
                break;
            }
            if other.visible_bound().intersects(&visible) {
                break;
            }
        }

        match insert_at {
            Some(at) if at < ordered.len() => {
                ordered.insert(at, quad);
                moved += 1;
            }
            _ => ordered.push(quad),
        }
    }

    let mut batches: Vec<DrawBatch> = Vec::new();
    for quad in ordered {
        let (texture, shader) = quad.batch_key();
        match batches.last_mut() {
            Some(last) if last.texture == texture && last.shader == shader => {
                last.quads.push(quad)
            }
            _ => batches.push(DrawBatch {
                texture,
                shader,
                quads: vec![quad],
            }),
        }
    }
    (batches, moved)
}
