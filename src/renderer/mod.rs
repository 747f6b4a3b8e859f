//! Render pipeline: scene traversal, batching and submission to a backend.
//!
//! The crate never talks to a GPU API itself. A [`Renderer`] implementation
//! receives texture uploads and frees, offscreen target passes and packed
//! quad batches in a fixed order.

mod batcher;
mod quad;

pub use batcher::{coalesce, BatchOp, Batcher, BuildOutput, DrawBatch, FrameBatch};
pub use quad::{
    QuadDescriptor, QuadInstance, FULL_UV, QUAD_FLAG_CLIPPED, QUAD_FLAG_TEXTURED,
};

use crate::paint::Color;
use crate::texture::{LoadedTexture, TextureCommand, TextureId, UploadReporter};

/// Backend that draws a [`FrameBatch`].
pub trait Renderer {
    /// Create or replace the GPU texture for `texture`.
    fn upload_texture(&mut self, texture: TextureId, data: &LoadedTexture) -> Result<(), String>;

    /// Create an offscreen render target.
    fn allocate_target(&mut self, texture: TextureId, width: u32, height: u32)
        -> Result<(), String>;

    fn free_texture(&mut self, texture: TextureId);

    /// Start a pass into `target`, or the screen when `None`.
    fn begin_target(&mut self, target: Option<TextureId>, width: u32, height: u32, clear: Color);

    fn draw(&mut self, batch: &DrawBatch);

    fn end_target(&mut self);

    /// Called once after every pass of a frame was issued.
    fn finish_frame(&mut self) {}
}

/// Hand a frame to `renderer`.
///
/// Uploads and allocations are applied before any pass so the frame can
/// sample them; frees are applied after the last pass. Failed uploads are
/// reported back to the texture manager and take effect on the next tick.
pub fn submit(
    renderer: &mut dyn Renderer,
    batch: &FrameBatch,
    commands: Vec<TextureCommand>,
    reporter: &UploadReporter,
) {
    let frees = apply_uploads(renderer, commands, reporter);

    for op in &batch.ops {
        match op {
            BatchOp::BeginTarget {
                target,
                width,
                height,
                clear,
            } => renderer.begin_target(*target, *width, *height, *clear),
            BatchOp::Draw(draw) => renderer.draw(draw),
            BatchOp::EndTarget => renderer.end_target(),
        }
    }
    renderer.finish_frame();

    for texture in frees {
        renderer.free_texture(texture);
    }
}

/// Apply texture commands outside of a frame, e.g. after an idle cleanup.
pub fn flush_texture_commands(
    renderer: &mut dyn Renderer,
    commands: Vec<TextureCommand>,
    reporter: &UploadReporter,
) {
    for texture in apply_uploads(renderer, commands, reporter) {
        renderer.free_texture(texture);
    }
}

/// Apply uploads and allocations; returns the textures to free.
fn apply_uploads(
    renderer: &mut dyn Renderer,
    commands: Vec<TextureCommand>,
    reporter: &UploadReporter,
) -> Vec<TextureId> {
    let mut frees = Vec::new();
    for command in commands {
        match command {
            TextureCommand::Upload { texture, data } => {
                if let Err(reason) = renderer.upload_texture(texture, &data) {
                    log::warn!("Upload of texture {texture:?} failed: {reason}");
                    reporter.upload_failed(texture, reason);
                }
            }
            TextureCommand::AllocateTarget {
                texture,
                width,
                height,
            } => {
                if let Err(reason) = renderer.allocate_target(texture, width, height) {
                    log::warn!("Render target {texture:?} allocation failed: {reason}");
                    reporter.upload_failed(texture, reason);
                }
            }
            TextureCommand::Free { texture } => frees.push(texture),
        }
    }
    frees
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeProps;
    use crate::texture::{
        ImageLoader, PixelFormat, Procedural, TextureManager, TextureMemoryConfig, TextureSource,
        TextureState,
    };
    use crate::tree::SceneTree;
    use crate::geometry::Rect;

    #[derive(Default)]
    struct Log {
        calls: Vec<String>,
        fail_uploads: bool,
    }

    impl Renderer for Log {
        fn upload_texture(&mut self, texture: TextureId, data: &LoadedTexture) -> Result<(), String> {
            self.calls
                .push(format!("upload {} {}x{}", texture.as_u64(), data.width, data.height));
            if self.fail_uploads {
                return Err("out of memory".into());
            }
            Ok(())
        }

        fn allocate_target(
            &mut self,
            texture: TextureId,
            width: u32,
            height: u32,
        ) -> Result<(), String> {
            self.calls
                .push(format!("target {} {width}x{height}", texture.as_u64()));
            Ok(())
        }

        fn free_texture(&mut self, texture: TextureId) {
            self.calls.push(format!("free {}", texture.as_u64()));
        }

        fn begin_target(&mut self, target: Option<TextureId>, width: u32, height: u32, _: Color) {
            let name = target.map(|t| t.as_u64().to_string()).unwrap_or("screen".into());
            self.calls.push(format!("begin {name} {width}x{height}"));
        }

        fn draw(&mut self, batch: &DrawBatch) {
            self.calls.push(format!("draw {}", batch.quads.len()));
        }

        fn end_target(&mut self) {
            self.calls.push("end".into());
        }
    }

    fn solid_source() -> TextureSource {
        TextureSource::Procedural(Procedural::Solid {
            color: Color::WHITE,
            width: 2,
            height: 2,
        })
    }

    #[test]
    fn test_submit_orders_uploads_passes_and_frees() {
        let mut tree = SceneTree::new(100.0, 100.0);
        let mut textures = TextureManager::new(TextureMemoryConfig::default(), ImageLoader::new());
        let mut batcher = Batcher::new(Rect::new(0.0, 0.0, 100.0, 100.0), 0.0, 16);
        let root = tree.root();
        let node = tree
            .create_node(root, NodeProps::rect(0.0, 0.0, 10.0, 10.0))
            .unwrap();
        let texture = textures.acquire(solid_source());
        tree.replace_texture(node, Some(texture));
        textures.process_completions();

        let out = batcher.build(&mut tree, &mut textures);
        let mut log = Log::default();
        submit(&mut log, &out.batch, textures.take_commands(), &textures.upload_reporter());

        let id = texture.as_u64();
        assert_eq!(
            log.calls,
            vec![
                format!("upload {id} 2x2"),
                "begin screen 100x100".to_string(),
                "draw 1".to_string(),
                "end".to_string(),
            ]
        );
    }

    #[test]
    fn test_failed_upload_marks_texture_failed() {
        let mut textures = TextureManager::new(TextureMemoryConfig::default(), ImageLoader::new());
        let texture = textures.acquire(solid_source());
        textures.process_completions();
        assert_eq!(textures.used_bytes(), PixelFormat::Rgba8.byte_size(2, 2));

        let mut log = Log {
            fail_uploads: true,
            ..Log::default()
        };
        submit(
            &mut log,
            &FrameBatch::default(),
            textures.take_commands(),
            &textures.upload_reporter(),
        );
        textures.process_completions();
        assert!(matches!(textures.state(texture), Some(TextureState::Failed(_))));
        assert_eq!(textures.used_bytes(), 0);
    }
}
