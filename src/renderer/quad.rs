//! Quad descriptors and their GPU instance packing.

use crate::geometry::Rect;
use crate::paint::{CornerColors, Shader, ShaderKey};
use crate::texture::TextureId;
use crate::transform::Transform;
use crate::tree::NodeId;

/// Full texture coordinates `[u0, v0, u1, v1]`.
pub const FULL_UV: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

/// Instance flag: `clip_rect` is valid.
pub const QUAD_FLAG_CLIPPED: u32 = 1 << 0;
/// Instance flag: sample `texture` instead of using vertex colors only.
pub const QUAD_FLAG_TEXTURED: u32 = 1 << 1;

/// One textured or colored quad, in the coordinate space of the target it is
/// drawn into.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadDescriptor {
    pub node: NodeId,
    /// Maps the local box `(0, 0, width, height)` into target space
    pub transform: Transform,
    pub width: f32,
    pub height: f32,
    pub colors: CornerColors,
    /// Accumulated alpha of the node and its ancestors within the target
    pub alpha: f32,
    pub texture: Option<TextureId>,
    pub uv: [f32; 4],
    pub shader: Shader,
    /// Scissor in target space
    pub clip: Option<Rect>,
    /// Axis-aligned bound in target space
    pub bound: Rect,
}

impl QuadDescriptor {
    /// Quads with equal keys can be drawn by one call.
    pub fn batch_key(&self) -> (Option<TextureId>, ShaderKey) {
        (self.texture, self.shader.key())
    }

    /// Part of the quad that can touch pixels.
    pub fn visible_bound(&self) -> Rect {
        match self.clip {
            Some(clip) => self.bound.intersect(&clip),
            None => self.bound,
        }
    }

    pub fn to_instance(&self) -> QuadInstance {
        let mut flags = 0;
        if self.clip.is_some() {
            flags |= QUAD_FLAG_CLIPPED;
        }
        if self.texture.is_some() {
            flags |= QUAD_FLAG_TEXTURED;
        }
        let clip = self
            .clip
            .map(|c| [c.x, c.y, c.width, c.height])
            .unwrap_or([0.0; 4]);

        QuadInstance {
            transform: self.transform.rows(),
            size: [self.width, self.height],
            uv: self.uv,
            colors: self.colors.to_rgba8(),
            clip_rect: clip,
            params: self.shader.params(),
            alpha: self.alpha,
            shader: self.shader.key() as u32,
            flags,
            _pad: 0,
        }
    }
}

/// Per-instance data for a quad, laid out for direct upload with
/// `bytemuck::cast_slice`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadInstance {
    /// Affine transform rows `[a, b, tx, 0]`, `[c, d, ty, 0]`
    pub transform: [[f32; 4]; 2],
    /// Local box size in pixels
    pub size: [f32; 2],
    /// Texture coordinates `[u0, v0, u1, v1]`
    pub uv: [f32; 4],
    /// Corner colors packed as `0xRRGGBBAA`: top-left, top-right,
    /// bottom-left, bottom-right
    pub colors: [u32; 4],
    /// Clip rect `[x, y, width, height]` in target pixels
    pub clip_rect: [f32; 4],
    /// Shader parameter block
    pub params: [f32; 8],
    pub alpha: f32,
    /// [`ShaderKey`] discriminant
    pub shader: u32,
    /// `QUAD_FLAG_*` bits
    pub flags: u32,
    pub _pad: u32,
}
