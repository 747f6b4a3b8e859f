//! Loading texture sources into pixel data.
//!
//! Loads are asynchronous from the manager's point of view: a loader receives
//! a [`LoadCompleter`] and may finish on any thread. Results are queued and
//! only applied when the manager drains its completion queue on the next
//! tick.

use std::path::Path;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;

use super::resource::{PixelData, PixelFormat, Procedural, TextureId, TextureSource};

/// Quality multiplier for SVG rasterization.
pub const SVG_QUALITY_MULTIPLIER: f32 = 2.0;

/// Decoded pixels ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedTexture {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Arc<[u8]>,
}

impl LoadedTexture {
    pub fn byte_size(&self) -> u64 {
        self.format.byte_size(self.width, self.height)
    }
}

impl From<PixelData> for LoadedTexture {
    fn from(data: PixelData) -> Self {
        Self {
            width: data.width,
            height: data.height,
            format: data.format,
            pixels: data.data,
        }
    }
}

/// Messages delivered to the manager's completion queue.
#[derive(Debug)]
pub(crate) enum Completion {
    Load {
        texture: TextureId,
        generation: u32,
        result: Result<LoadedTexture, String>,
    },
    UploadFailed {
        texture: TextureId,
        reason: String,
    },
}

/// One-shot handle a loader uses to report the outcome of a load.
///
/// Dropping it without calling [`complete`](Self::complete) leaves the
/// texture in the loading state until it is reacquired after eviction.
#[derive(Debug)]
pub struct LoadCompleter {
    texture: TextureId,
    generation: u32,
    sender: Sender<Completion>,
}

impl LoadCompleter {
    pub(crate) fn new(texture: TextureId, generation: u32, sender: Sender<Completion>) -> Self {
        Self {
            texture,
            generation,
            sender,
        }
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn complete(self, result: Result<LoadedTexture, String>) {
        let texture = self.texture;
        if self
            .sender
            .send(Completion::Load {
                texture,
                generation: self.generation,
                result,
            })
            .is_err()
        {
            log::debug!("Texture manager dropped before load of {texture:?} completed");
        }
    }
}

/// Reports GPU upload failures back to the manager.
///
/// Handed to the renderer; cloneable and sendable across threads.
#[derive(Debug, Clone)]
pub struct UploadReporter {
    sender: Sender<Completion>,
}

impl UploadReporter {
    pub(crate) fn new(sender: Sender<Completion>) -> Self {
        Self { sender }
    }

    pub fn upload_failed(&self, texture: TextureId, reason: impl Into<String>) {
        let _ = self.sender.send(Completion::UploadFailed {
            texture,
            reason: reason.into(),
        });
    }
}

/// Turns a [`TextureSource`] into pixels.
pub trait TextureLoader {
    /// Start loading `source`. The result must be delivered through
    /// `completer`, now or later, from any thread.
    fn load(&mut self, source: &TextureSource, completer: LoadCompleter);
}

/// Default loader: decodes raster images with `image` and rasterizes SVGs
/// with `resvg`.
#[derive(Debug, Clone, Default)]
pub struct ImageLoader {
    threaded: bool,
    stack_size: Option<usize>,
}

impl ImageLoader {
    /// Decode on the calling thread. The completion still only applies on
    /// the next tick.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode each source on a spawned thread.
    pub fn threaded() -> Self {
        Self {
            threaded: true,
            stack_size: None,
        }
    }

    /// Stack size for decode threads. Large SVGs can need more than the
    /// platform default.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Decode `source` synchronously.
    pub fn decode(source: &TextureSource) -> Result<LoadedTexture, String> {
        match source {
            TextureSource::Url(url) => {
                let path = url.strip_prefix("file://").unwrap_or(url);
                if path.contains("://") {
                    return Err(format!("unsupported url scheme: {url}"));
                }
                if path.ends_with(".svg") {
                    let data = std::fs::read(path).map_err(|e| format!("{path}: {e}"))?;
                    return decode_svg(&data, SVG_QUALITY_MULTIPLIER);
                }
                decode_raster_file(Path::new(path))
            }
            TextureSource::Encoded(bytes) => decode_raster_bytes(bytes),
            TextureSource::Svg { data, scale } => decode_svg(data, *scale),
            TextureSource::Pixels(pixels) => {
                let expected = pixels.format.byte_size(pixels.width, pixels.height);
                if (pixels.data.len() as u64) < expected && !pixels.format.is_compressed() {
                    return Err(format!(
                        "pixel buffer holds {} bytes, {expected} expected",
                        pixels.data.len()
                    ));
                }
                Ok(pixels.clone().into())
            }
            TextureSource::Procedural(procedural) => Ok(generate(procedural)),
            TextureSource::RenderTarget { .. } => {
                Err("render targets are allocated, not loaded".to_string())
            }
        }
    }
}

impl TextureLoader for ImageLoader {
    fn load(&mut self, source: &TextureSource, completer: LoadCompleter) {
        if !self.threaded {
            completer.complete(Self::decode(source));
            return;
        }

        let source = source.clone();
        // The completer moves to the worker only once it is running.
        let (handoff, inbox) = mpsc::channel::<LoadCompleter>();
        let mut builder = std::thread::Builder::new().name("lumo-texture-loader".into());
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }
        let spawned = builder.spawn(move || {
            if let Ok(completer) = inbox.recv() {
                completer.complete(Self::decode(&source));
            }
        });
        match spawned {
            Ok(_) => {
                if let Err(mpsc::SendError(completer)) = handoff.send(completer) {
                    completer.complete(Err("texture loader thread exited".to_string()));
                }
            }
            Err(e) => {
                log::error!("Failed to spawn texture loader thread: {e}");
                completer.complete(Err(format!("failed to spawn loader thread: {e}")));
            }
        }
    }
}

fn from_rgba(rgba: image::RgbaImage) -> Result<LoadedTexture, String> {
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err("image has zero size".to_string());
    }
    Ok(LoadedTexture {
        width,
        height,
        format: PixelFormat::Rgba8,
        pixels: rgba.into_raw().into(),
    })
}

fn decode_raster_file(path: &Path) -> Result<LoadedTexture, String> {
    let img = image::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
    from_rgba(img.to_rgba8())
}

fn decode_raster_bytes(bytes: &[u8]) -> Result<LoadedTexture, String> {
    let img = image::load_from_memory(bytes).map_err(|e| e.to_string())?;
    from_rgba(img.to_rgba8())
}

#[cfg(feature = "svg")]
fn decode_svg(bytes: &[u8], scale: f32) -> Result<LoadedTexture, String> {
    let tree = resvg::usvg::Tree::from_data(bytes, &resvg::usvg::Options::default())
        .map_err(|e| e.to_string())?;
    let size = tree.size();

    let width = (size.width() * scale).ceil() as u32;
    let height = (size.height() * scale).ceil() as u32;
    if width == 0 || height == 0 {
        return Err("svg has zero size".to_string());
    }

    let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| format!("cannot allocate {width}x{height} pixmap"))?;
    let transform = resvg::tiny_skia::Transform::from_scale(scale, scale);
    resvg::render(&tree, transform, &mut pixmap.as_mut());

    // tiny-skia output is premultiplied RGBA
    Ok(LoadedTexture {
        width,
        height,
        format: PixelFormat::Rgba8,
        pixels: pixmap.take().into(),
    })
}

#[cfg(not(feature = "svg"))]
fn decode_svg(_bytes: &[u8], _scale: f32) -> Result<LoadedTexture, String> {
    Err("svg support is disabled".to_string())
}

fn generate(procedural: &Procedural) -> LoadedTexture {
    let (width, height) = procedural.dimensions();
    let mut pixels = Vec::with_capacity((width as usize) * (height as usize) * 4);
    match *procedural {
        Procedural::Solid { color, .. } => {
            let rgba = color.to_rgba8().to_be_bytes();
            for _ in 0..(width as usize) * (height as usize) {
                pixels.extend_from_slice(&rgba);
            }
        }
        Procedural::Checkerboard { cell, colors, .. } => {
            let cell = cell.max(1);
            let even = colors[0].to_rgba8().to_be_bytes();
            let odd = colors[1].to_rgba8().to_be_bytes();
            for y in 0..height {
                for x in 0..width {
                    let pick = ((x / cell) + (y / cell)) % 2 == 0;
                    pixels.extend_from_slice(if pick { &even } else { &odd });
                }
            }
        }
    }
    LoadedTexture {
        width,
        height,
        format: PixelFormat::Rgba8,
        pixels: pixels.into(),
    }
}
