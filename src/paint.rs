//! Paint attributes: colors, per-corner gradients and shader variants.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn from_hex(hex: u32) -> Self {
        Self {
            r: ((hex >> 16) & 0xFF) as f32 / 255.0,
            g: ((hex >> 8) & 0xFF) as f32 / 255.0,
            b: (hex & 0xFF) as f32 / 255.0,
            a: 1.0,
        }
    }

    /// Pack as `0xRRGGBBAA`, the layout quads carry to the GPU.
    pub fn to_rgba8(&self) -> u32 {
        let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u32;
        (q(self.r) << 24) | (q(self.g) << 16) | (q(self.b) << 8) | q(self.a)
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Four corner colors, bilinearly blended across a quad.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CornerColors {
    pub top_left: Color,
    pub top_right: Color,
    pub bottom_left: Color,
    pub bottom_right: Color,
}

impl CornerColors {
    /// All four corners set to the same color.
    pub const fn solid(color: Color) -> Self {
        Self {
            top_left: color,
            top_right: color,
            bottom_left: color,
            bottom_right: color,
        }
    }

    /// Left-to-right gradient.
    pub const fn horizontal(left: Color, right: Color) -> Self {
        Self {
            top_left: left,
            top_right: right,
            bottom_left: left,
            bottom_right: right,
        }
    }

    /// Top-to-bottom gradient.
    pub const fn vertical(top: Color, bottom: Color) -> Self {
        Self {
            top_left: top,
            top_right: top,
            bottom_left: bottom,
            bottom_right: bottom,
        }
    }

    /// Whether every corner is fully transparent.
    pub fn is_transparent(&self) -> bool {
        self.top_left.a <= 0.0
            && self.top_right.a <= 0.0
            && self.bottom_left.a <= 0.0
            && self.bottom_right.a <= 0.0
    }

    pub fn to_rgba8(&self) -> [u32; 4] {
        [
            self.top_left.to_rgba8(),
            self.top_right.to_rgba8(),
            self.bottom_left.to_rgba8(),
            self.bottom_right.to_rgba8(),
        ]
    }
}

/// Shader program selected for a node, with its fixed parameter schema.
///
/// The set of programs is closed; the renderer switches on [`ShaderKey`] and
/// reads the parameters packed by [`Shader::params`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Shader {
    /// Plain textured / colored quad
    #[default]
    Default,
    /// Quad with rounded corners
    RoundedRect {
        /// Corner radius in logical pixels
        radius: f32,
    },
    /// Quad with an inset border stroke
    Border {
        /// Stroke width in logical pixels
        width: f32,
        /// Stroke color
        color: Color,
    },
    /// Desaturate the sampled texture
    Grayscale {
        /// 0.0 = untouched, 1.0 = fully gray
        amount: f32,
    },
}

/// Identifies the shader program, ignoring parameters.
///
/// Adjacent quads with equal keys (and texture) can share a draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum ShaderKey {
    Default = 0,
    RoundedRect = 1,
    Border = 2,
    Grayscale = 3,
}

impl Shader {
    pub fn key(&self) -> ShaderKey {
        match self {
            Shader::Default => ShaderKey::Default,
            Shader::RoundedRect { .. } => ShaderKey::RoundedRect,
            Shader::Border { .. } => ShaderKey::Border,
            Shader::Grayscale { .. } => ShaderKey::Grayscale,
        }
    }

    /// Pack the parameters into the fixed-size block carried by each quad.
    pub fn params(&self) -> [f32; 8] {
        match *self {
            Shader::Default => [0.0; 8],
            Shader::RoundedRect { radius } => [radius, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            Shader::Border { width, color } => {
                [width, color.r, color.g, color.b, color.a, 0.0, 0.0, 0.0]
            }
            Shader::Grayscale { amount } => [amount, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        }
    }
}
