//! Retained-mode 2D scene graph renderer core.
//!
//! A [`Stage`] owns the scene tree, the texture manager, the spatial index,
//! the batcher and the frame scheduler. The embedder mutates nodes, calls
//! [`Stage::tick`] once per display refresh with a [`Renderer`] backend and
//! drains [`StageEvent`]s afterwards.

pub mod error;
pub mod events;
pub mod geometry;
pub mod node;
pub mod paint;
pub mod pivot;
pub mod render_stats;
pub mod renderer;
pub mod scheduler;
pub mod spatial;
pub mod texture;
pub mod transform;
pub mod tree;

use std::time::{Duration, Instant};

use error::StructuralError;
use events::StageEvent;
use geometry::{Point, Rect};
use node::NodeProps;
use paint::Color;
use render_stats::{RenderStats, StatsSnapshot};
use renderer::{Batcher, Renderer};
use scheduler::{Animation, AnimationId, FrameScheduler, SchedulerState};
use spatial::SpatialIndex;
use texture::{
    CleanupMode, CleanupReport, ImageLoader, MemoryInfo, TextureId, TextureLoader, TextureManager,
    TextureMemoryConfig, TextureSource,
};
use tree::{NodeId, SceneTree};

pub mod prelude {
    pub use crate::error::{StructuralError, TextureError};
    pub use crate::events::{Diagnostic, StageEvent};
    pub use crate::geometry::{Point, Rect};
    pub use crate::node::{NodeFlags, NodeProperty, NodeProps};
    pub use crate::paint::{Color, CornerColors, Shader};
    pub use crate::pivot::Pivot;
    pub use crate::renderer::{DrawBatch, Renderer};
    pub use crate::scheduler::{Animation, AnimationStatus};
    pub use crate::texture::{
        CacheKey, CleanupMode, LoadedTexture, PixelFormat, Procedural, TextureId,
        TextureMemoryConfig, TextureSource, TextureState,
    };
    pub use crate::tree::{NodeId, SceneTree};
    pub use crate::{Stage, StageConfig, TickOutcome};
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageConfig {
    pub width: u32,
    pub height: u32,
    /// Extra pixels around the viewport that still count as on screen
    pub bounds_margin: f32,
    pub clear_color: Color,
    /// Global frame cap; `None` renders at the tick rate
    pub target_fps: Option<f32>,
    pub fps_update_interval: Duration,
    pub spatial_cell_size: f32,
    /// How far a quad may move to join a batch with the same key
    pub batch_reorder_window: usize,
    pub texture_memory: TextureMemoryConfig,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            bounds_margin: 100.0,
            clear_color: Color::BLACK,
            target_fps: None,
            fps_update_interval: Duration::from_secs(1),
            spatial_cell_size: 128.0,
            batch_reorder_window: 16,
            texture_memory: TextureMemoryConfig::default(),
        }
    }
}

impl StageConfig {
    pub fn width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    pub fn height(mut self, height: u32) -> Self {
        self.height = height;
        self
    }

    pub fn bounds_margin(mut self, margin: f32) -> Self {
        self.bounds_margin = margin;
        self
    }

    pub fn clear_color(mut self, color: Color) -> Self {
        self.clear_color = color;
        self
    }

    pub fn target_fps(mut self, fps: Option<f32>) -> Self {
        self.target_fps = fps;
        self
    }

    pub fn fps_update_interval(mut self, interval: Duration) -> Self {
        self.fps_update_interval = interval;
        self
    }

    pub fn spatial_cell_size(mut self, size: f32) -> Self {
        self.spatial_cell_size = size;
        self
    }

    pub fn batch_reorder_window(mut self, window: usize) -> Self {
        self.batch_reorder_window = window;
        self
    }

    pub fn texture_memory(mut self, config: TextureMemoryConfig) -> Self {
        self.texture_memory = config;
        self
    }

    pub fn critical_threshold(mut self, bytes: u64) -> Self {
        self.texture_memory.critical_threshold = bytes;
        self
    }

    pub fn target_threshold_level(mut self, level: f32) -> Self {
        self.texture_memory.target_threshold_level = level;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.texture_memory.cleanup_interval = interval;
        self
    }

    pub fn idle_cleanup_delay(mut self, delay: Duration) -> Self {
        self.texture_memory.idle_cleanup_delay = delay;
        self
    }

    pub fn do_not_exceed_critical_threshold(mut self, strict: bool) -> Self {
        self.texture_memory.do_not_exceed_critical_threshold = strict;
        self
    }

    fn viewport(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width as f32, self.height as f32)
    }
}

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The global frame cap had not elapsed; nothing ran
    Throttled,
    /// No pending work; nothing was submitted
    Skipped,
    /// A frame was built and submitted
    Rendered { frame: u64 },
}

/// One independent scene with its own caches and budget.
pub struct Stage {
    config: StageConfig,
    tree: SceneTree,
    textures: TextureManager,
    spatial: SpatialIndex,
    batcher: Batcher,
    scheduler: FrameScheduler,
    stats: RenderStats,
    events: Vec<StageEvent>,
}

impl Stage {
    /// Create a stage that decodes textures with [`ImageLoader`].
    pub fn new(config: StageConfig) -> Self {
        Self::with_loader(config, ImageLoader::new())
    }

    pub fn with_loader(config: StageConfig, loader: impl TextureLoader + 'static) -> Self {
        log::info!(
            "Creating stage: {}x{}, texture budget {} bytes (target {}), fps cap {:?}",
            config.width,
            config.height,
            config.texture_memory.critical_threshold,
            config.texture_memory.target_threshold(),
            config.target_fps
        );

        let tree = SceneTree::new(config.width as f32, config.height as f32);
        let textures = TextureManager::new(config.texture_memory.clone(), loader);
        let spatial = SpatialIndex::new(config.spatial_cell_size);
        let batcher = Batcher::new(
            config.viewport(),
            config.bounds_margin,
            config.batch_reorder_window,
        )
        .with_clear_color(config.clear_color);
        let scheduler = FrameScheduler::new(config.target_fps, config.fps_update_interval);

        Self {
            config,
            tree,
            textures,
            spatial,
            batcher,
            scheduler,
            stats: RenderStats::new(),
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn tree(&self) -> &SceneTree {
        &self.tree
    }

    /// Direct access for property setters and animations.
    pub fn tree_mut(&mut self) -> &mut SceneTree {
        &mut self.tree
    }

    pub fn textures(&self) -> &TextureManager {
        &self.textures
    }

    pub fn textures_mut(&mut self) -> &mut TextureManager {
        &mut self.textures
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn create_node(&mut self, parent: NodeId, props: NodeProps) -> Result<NodeId, StructuralError> {
        self.tree.create_node(parent, props)
    }

    pub fn reparent(
        &mut self,
        node: NodeId,
        new_parent: NodeId,
        index: Option<usize>,
    ) -> Result<(), StructuralError> {
        self.tree.reparent(node, new_parent, index)
    }

    /// Destroy `node` and its subtree, releasing every texture they held.
    /// Returns the number of nodes destroyed.
    pub fn destroy_node(&mut self, node: NodeId) -> Result<usize, StructuralError> {
        let destroyed = self.tree.destroy(node)?;
        for entry in &destroyed {
            if let Some(texture) = entry.texture {
                self.textures.release(texture);
            }
            if let Some(target) = entry.render_target {
                self.textures.release(target);
            }
            self.spatial.remove(entry.id);
        }
        log::trace!("Destroyed {} nodes under {node:?}", destroyed.len());
        Ok(destroyed.len())
    }

    /// Point `node` at the texture for `source`, or clear it with `None`.
    ///
    /// The new texture is acquired before the old one is released, so
    /// re-setting the same source never drops the resource.
    pub fn set_texture(&mut self, node: NodeId, source: Option<TextureSource>) -> Option<TextureId> {
        if !self.tree.contains(node) {
            log::warn!("set_texture on unknown node {node:?}");
            return None;
        }
        let texture = source.map(|source| self.textures.acquire(source));
        if let Some(Some(previous)) = self.tree.replace_texture(node, texture) {
            self.textures.release(previous);
        }
        texture
    }

    pub fn add_animation(&mut self, animation: impl Animation + 'static) -> AnimationId {
        self.scheduler.add_animation(Box::new(animation))
    }

    pub fn remove_animation(&mut self, id: AnimationId) -> bool {
        self.scheduler.remove_animation(id)
    }

    pub fn set_target_fps(&mut self, fps: Option<f32>) {
        self.config.target_fps = fps;
        self.scheduler.set_target_fps(fps);
    }

    /// Resize the viewport and the root node.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.config.width = width;
        self.config.height = height;
        let root = self.tree.root();
        self.tree.set_size(root, width as f32, height as f32);
        self.batcher.set_viewport(self.config.viewport());
    }

    /// Visible nodes under `(x, y)`, topmost first.
    pub fn query_point(&mut self, x: f32, y: f32) -> Vec<NodeId> {
        self.spatial.query_point(&mut self.tree, Point::new(x, y))
    }

    /// Nodes whose world bound intersects `rect`.
    pub fn query_rect(&mut self, rect: Rect) -> Vec<NodeId> {
        self.spatial.query_rect(&mut self.tree, &rect)
    }

    pub fn has_pending_work(&self) -> bool {
        self.tree.has_pending_work()
    }

    /// Run a texture cleanup pass now. Frees are applied to the renderer on
    /// the next tick.
    pub fn cleanup_textures(&mut self, mode: CleanupMode) -> CleanupReport {
        let report = self.textures.cleanup(mode);
        self.record_cleanup(mode, report);
        report
    }

    pub fn memory_info(&self) -> MemoryInfo {
        self.textures.memory_info()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<StageEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn tick(&mut self, backend: &mut dyn Renderer) -> TickOutcome {
        self.tick_at(Instant::now(), backend)
    }

    /// Run one frame tick at `now`.
    ///
    /// Order: drain load completions, advance animations, budget check,
    /// then build and submit a frame if anything changed. Idle transitions
    /// and the idle cleanup happen at the end.
    pub fn tick_at(&mut self, now: Instant, backend: &mut dyn Renderer) -> TickOutcome {
        let Some(delta) = self.scheduler.begin_tick(now) else {
            return TickOutcome::Throttled;
        };

        self.textures.process_completions();
        if self.textures.take_changed() {
            self.tree.request_render();
        }

        self.scheduler.advance_animations(&mut self.tree, delta);

        if let Some((mode, report)) = self.textures.maybe_cleanup(now) {
            self.record_cleanup(mode, report);
        }

        let reporter = self.textures.upload_reporter();
        let outcome = if self.tree.has_pending_work() {
            let output = self.batcher.build(&mut self.tree, &mut self.textures);
            self.stats.record_frame_rendered(&output.counts);
            self.events
                .extend(output.diagnostics.into_iter().map(StageEvent::from));
            renderer::submit(backend, &output.batch, self.textures.take_commands(), &reporter);
            TickOutcome::Rendered {
                frame: output.batch.frame,
            }
        } else {
            self.stats.record_frame_skipped();
            TickOutcome::Skipped
        };

        let rendered = matches!(outcome, TickOutcome::Rendered { .. });
        let transitions = self.scheduler.finish_tick(now, rendered);
        for event in &transitions {
            if let StageEvent::FpsUpdate { fps } = event {
                log::debug!("FPS: {fps:.1}");
            }
        }
        self.events.extend(transitions);

        let idle_delay = self.config.texture_memory.idle_cleanup_delay;
        if self.scheduler.idle_cleanup_due(now, idle_delay) {
            self.cleanup_textures(CleanupMode::Idle);
        }

        // Frees from cleanups and releases outside a frame.
        renderer::flush_texture_commands(backend, self.textures.take_commands(), &reporter);

        self.events.extend(
            self.textures
                .take_diagnostics()
                .into_iter()
                .map(StageEvent::from),
        );
        self.stats.end_frame(now);
        outcome
    }

    fn record_cleanup(&mut self, mode: CleanupMode, report: CleanupReport) {
        if report.evicted == 0 {
            return;
        }
        self.stats
            .record_eviction(report.evicted, report.bytes_freed);
        self.events.push(StageEvent::TexturesEvicted { mode, report });
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("config", &self.config)
            .field("nodes", &self.tree.node_count())
            .field("textures", &self.textures.len())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
