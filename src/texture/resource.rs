//! Texture resources: identity, cache keys, byte accounting and state.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::TextureError;
use crate::paint::Color;

/// Handle to a resource in the [`TextureManager`](super::TextureManager).
///
/// Generational like [`NodeId`](crate::tree::NodeId): a handle to a removed
/// resource never aliases a newer one. Renderers use it as the stable name
/// of the GPU texture across reloads.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct TextureId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl TextureId {
    /// Combines generation (high bits) with index (low bits).
    pub fn as_u64(self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }
}

/// Pixel storage format of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    #[default]
    Rgba8,
    Rgb8,
    Alpha8,
    /// ETC1, 4x4 blocks of 8 bytes
    Etc1,
    /// ETC2 with alpha, 4x4 blocks of 16 bytes
    Etc2Rgba,
    /// ASTC 4x4, 16 bytes per block
    Astc4x4,
    /// PVRTC 4 bits per pixel, minimum 8x8 texels
    Pvrtc4,
}

impl PixelFormat {
    /// Bytes occupied by a `width x height` texture in this format.
    ///
    /// Used for both allocation and release so tracked usage never drifts.
    pub fn byte_size(self, width: u32, height: u32) -> u64 {
        let (w, h) = (width as u64, height as u64);
        let blocks = |block: u64| w.div_ceil(block) * h.div_ceil(block);
        match self {
            PixelFormat::Rgba8 => w * h * 4,
            PixelFormat::Rgb8 => w * h * 3,
            PixelFormat::Alpha8 => w * h,
            PixelFormat::Etc1 => blocks(4) * 8,
            PixelFormat::Etc2Rgba | PixelFormat::Astc4x4 => blocks(4) * 16,
            PixelFormat::Pvrtc4 => (w.max(8) * h.max(8) * 4).div_ceil(8),
        }
    }

    pub fn is_compressed(self) -> bool {
        !matches!(
            self,
            PixelFormat::Rgba8 | PixelFormat::Rgb8 | PixelFormat::Alpha8
        )
    }
}

/// Raw, already-decoded pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelData {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Arc<[u8]>,
}

/// Texture generated from parameters instead of decoded bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Procedural {
    /// A single flat color
    Solid { color: Color, width: u32, height: u32 },
    /// Two alternating colors in square cells
    Checkerboard {
        cell: u32,
        colors: [Color; 2],
        width: u32,
        height: u32,
    },
}

impl Procedural {
    pub fn dimensions(&self) -> (u32, u32) {
        match *self {
            Procedural::Solid { width, height, .. } => (width, height),
            Procedural::Checkerboard { width, height, .. } => (width, height),
        }
    }
}

/// Where a texture's pixels come from.
///
/// The manager only hashes this to build the cache key; interpreting it is
/// the loader's job.
#[derive(Debug, Clone, PartialEq)]
pub enum TextureSource {
    /// File path or URL of an encoded image
    Url(String),
    /// Encoded image bytes (PNG, JPEG, GIF, WebP)
    Encoded(Arc<[u8]>),
    /// SVG document rasterized at `scale`
    Svg { data: Arc<[u8]>, scale: f32 },
    /// Pre-decoded pixels
    Pixels(PixelData),
    Procedural(Procedural),
    /// Offscreen render target; never cached or loaded
    RenderTarget { width: u32, height: u32 },
}

impl TextureSource {
    /// Deterministic cache key for this source.
    pub fn cache_key(&self) -> CacheKey {
        let mut hasher = DefaultHasher::new();
        match self {
            TextureSource::Url(url) => {
                "url".hash(&mut hasher);
                url.hash(&mut hasher);
            }
            TextureSource::Encoded(bytes) => {
                "encoded".hash(&mut hasher);
                bytes.hash(&mut hasher);
            }
            TextureSource::Svg { data, scale } => {
                "svg".hash(&mut hasher);
                data.hash(&mut hasher);
                scale.to_bits().hash(&mut hasher);
            }
            TextureSource::Pixels(pixels) => {
                "pixels".hash(&mut hasher);
                pixels.width.hash(&mut hasher);
                pixels.height.hash(&mut hasher);
                pixels.format.hash(&mut hasher);
                pixels.data.hash(&mut hasher);
            }
            TextureSource::Procedural(procedural) => {
                "procedural".hash(&mut hasher);
                hash_procedural(procedural, &mut hasher);
            }
            TextureSource::RenderTarget { .. } => return CacheKey::NoCache,
        }
        CacheKey::Keyed(hasher.finish())
    }

    /// Byte size known before loading, when the source carries dimensions.
    pub fn expected_bytes(&self) -> Option<u64> {
        match self {
            TextureSource::Pixels(p) => Some(p.format.byte_size(p.width, p.height)),
            TextureSource::Procedural(p) => {
                let (w, h) = p.dimensions();
                Some(PixelFormat::Rgba8.byte_size(w, h))
            }
            TextureSource::RenderTarget { width, height } => {
                Some(PixelFormat::Rgba8.byte_size(*width, *height))
            }
            _ => None,
        }
    }
}

fn hash_color(color: &Color, hasher: &mut impl Hasher) {
    for c in color.to_array() {
        c.to_bits().hash(hasher);
    }
}

fn hash_procedural(procedural: &Procedural, hasher: &mut impl Hasher) {
    match procedural {
        Procedural::Solid {
            color,
            width,
            height,
        } => {
            "solid".hash(hasher);
            hash_color(color, hasher);
            (width, height).hash(hasher);
        }
        Procedural::Checkerboard {
            cell,
            colors,
            width,
            height,
        } => {
            "checkerboard".hash(hasher);
            cell.hash(hasher);
            hash_color(&colors[0], hasher);
            hash_color(&colors[1], hasher);
            (width, height).hash(hasher);
        }
    }
}

/// Identity of a resource in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Shared between every acquisition with the same key
    Keyed(u64),
    /// Never shared; freed and removed as soon as it is released
    NoCache,
}

/// Lifecycle state of a texture.
///
/// `Initial → Loading → Loaded | Failed`, `Loaded | Failed → Freed` on
/// eviction, and `Freed → Loading` on reload.
#[derive(Debug, Clone, PartialEq)]
pub enum TextureState {
    Initial,
    Loading,
    Loaded,
    Failed(TextureError),
    Freed,
}

impl TextureState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, TextureState::Loaded)
    }
}

/// A GPU-backed image source tracked by the manager.
#[derive(Debug, Clone)]
pub struct TextureResource {
    pub(crate) id: TextureId,
    pub(crate) key: CacheKey,
    pub(crate) source: TextureSource,
    pub(crate) state: TextureState,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) format: PixelFormat,
    /// Bytes currently counted against the memory budget
    pub(crate) byte_size: u64,
    pub(crate) ref_count: u32,
    /// Protects the resource from eviction regardless of its ref count
    pub(crate) renderable_owner: bool,
    /// Frame of the last render use (or load completion)
    pub(crate) last_used_frame: u64,
    /// Tie-breaker for equal frames: order of load completion
    pub(crate) load_seq: u64,
    /// Incremented per load attempt so stale completions are recognizable
    pub(crate) load_generation: u32,
}

impl TextureResource {
    pub(crate) fn new(id: TextureId, key: CacheKey, source: TextureSource) -> Self {
        Self {
            id,
            key,
            source,
            state: TextureState::Initial,
            width: 0,
            height: 0,
            format: PixelFormat::Rgba8,
            byte_size: 0,
            ref_count: 0,
            renderable_owner: false,
            last_used_frame: 0,
            load_seq: 0,
            load_generation: 0,
        }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn key(&self) -> CacheKey {
        self.key
    }

    pub fn source(&self) -> &TextureSource {
        &self.source
    }

    pub fn state(&self) -> &TextureState {
        &self.state
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn is_renderable_owner(&self) -> bool {
        self.renderable_owner
    }

    pub fn last_used_frame(&self) -> u64 {
        self.last_used_frame
    }

    /// Whether the eviction routine may free this resource.
    pub(crate) fn is_evictable(&self) -> bool {
        self.ref_count == 0
            && !self.renderable_owner
            && matches!(self.state, TextureState::Loaded | TextureState::Failed(_))
    }

    /// Whether acquiring this resource should start a (re)load.
    pub(crate) fn needs_load(&self) -> bool {
        match &self.state {
            TextureState::Initial | TextureState::Freed => true,
            TextureState::Failed(err) => err.is_retryable(),
            TextureState::Loading | TextureState::Loaded => false,
        }
    }
}
