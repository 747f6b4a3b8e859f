//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use lumo::prelude::*;
use lumo::renderer::QuadDescriptor;
use lumo::texture::{LoadCompleter, TextureLoader};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Loader that parks every request until the test completes it.
#[derive(Clone, Default)]
pub struct ManualLoader {
    requests: Rc<RefCell<Vec<(TextureSource, LoadCompleter)>>>,
}

impl ManualLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn pending_for(&self, texture: TextureId) -> bool {
        self.requests
            .borrow()
            .iter()
            .any(|(_, c)| c.texture() == texture)
    }

    /// Complete the oldest request for `texture` with an RGBA8 image.
    pub fn complete(&self, texture: TextureId, width: u32, height: u32) -> bool {
        self.finish(texture, Ok(rgba(width, height)))
    }

    pub fn fail(&self, texture: TextureId, reason: &str) -> bool {
        self.finish(texture, Err(reason.to_string()))
    }

    /// Complete every parked request with a `width x height` image.
    pub fn complete_all(&self, width: u32, height: u32) -> usize {
        let requests: Vec<_> = self.requests.borrow_mut().drain(..).collect();
        let count = requests.len();
        for (_, completer) in requests {
            completer.complete(Ok(rgba(width, height)));
        }
        count
    }

    fn finish(&self, texture: TextureId, result: Result<LoadedTexture, String>) -> bool {
        let mut requests = self.requests.borrow_mut();
        let Some(pos) = requests.iter().position(|(_, c)| c.texture() == texture) else {
            return false;
        };
        let (_, completer) = requests.remove(pos);
        completer.complete(result);
        true
    }
}

impl TextureLoader for ManualLoader {
    fn load(&mut self, source: &TextureSource, completer: LoadCompleter) {
        self.requests.borrow_mut().push((source.clone(), completer));
    }
}

fn rgba(width: u32, height: u32) -> LoadedTexture {
    LoadedTexture {
        width,
        height,
        format: PixelFormat::Rgba8,
        pixels: Arc::from(Vec::new()),
    }
}

/// Renderer that records every call.
#[derive(Default)]
pub struct RecordingRenderer {
    pub uploads: Vec<TextureId>,
    pub targets: Vec<(TextureId, u32, u32)>,
    pub frees: Vec<TextureId>,
    pub frames: usize,
    /// Screen quads of the last finished frame
    pub screen: Vec<QuadDescriptor>,
    /// Offscreen quads of the last finished frame
    pub offscreen: Vec<QuadDescriptor>,
    pub fail_uploads: bool,
    current: Option<TextureId>,
    screen_acc: Vec<QuadDescriptor>,
    offscreen_acc: Vec<QuadDescriptor>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_uploads() -> Self {
        Self {
            fail_uploads: true,
            ..Self::default()
        }
    }

    pub fn drew(&self, node: NodeId) -> bool {
        self.screen.iter().any(|q| q.node == node)
    }

    pub fn screen_quad(&self, node: NodeId) -> Option<&QuadDescriptor> {
        self.screen.iter().find(|q| q.node == node)
    }
}

impl Renderer for RecordingRenderer {
    fn upload_texture(&mut self, texture: TextureId, _data: &LoadedTexture) -> Result<(), String> {
        if self.fail_uploads {
            return Err("device lost".to_string());
        }
        self.uploads.push(texture);
        Ok(())
    }

    fn allocate_target(&mut self, texture: TextureId, width: u32, height: u32) -> Result<(), String> {
        self.targets.push((texture, width, height));
        Ok(())
    }

    fn free_texture(&mut self, texture: TextureId) {
        self.frees.push(texture);
    }

    fn begin_target(&mut self, target: Option<TextureId>, _width: u32, _height: u32, _clear: Color) {
        self.current = target;
    }

    fn draw(&mut self, batch: &DrawBatch) {
        let acc = if self.current.is_some() {
            &mut self.offscreen_acc
        } else {
            &mut self.screen_acc
        };
        acc.extend(batch.quads.iter().cloned());
    }

    fn end_target(&mut self) {
        self.current = None;
    }

    fn finish_frame(&mut self) {
        self.frames += 1;
        self.screen = std::mem::take(&mut self.screen_acc);
        self.offscreen = std::mem::take(&mut self.offscreen_acc);
    }
}

pub const MB: u64 = 1024 * 1024;

/// A procedural source whose expected size is `width x height` RGBA8.
pub fn solid(seed: u32, width: u32, height: u32) -> TextureSource {
    TextureSource::Procedural(Procedural::Solid {
        color: Color::from_hex(seed),
        width,
        height,
    })
}
