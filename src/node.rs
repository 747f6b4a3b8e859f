//! Per-node properties set by client code and animation drivers.

use bitflags::bitflags;

use crate::paint::{Color, CornerColors, Shader};
use crate::pivot::Pivot;
use crate::transform::Transform;

bitflags! {
    /// Render state flags for a node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u8 {
        /// The node and its subtree are drawn.
        const VISIBLE = 1 << 0;
        /// Descendants are clipped to this node's bounds.
        const CLIPPING = 1 << 1;
        /// The subtree is rendered offscreen and composited as one quad.
        const RENDER_TO_TEXTURE = 1 << 2;
    }
}

impl Default for NodeFlags {
    fn default() -> Self {
        NodeFlags::VISIBLE
    }
}

/// Local properties of a scene node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeProps {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    /// Rotation in radians around `pivot`
    pub rotation: f32,
    pub pivot: Pivot,
    pub mount: Pivot,
    pub colors: CornerColors,
    pub alpha: f32,
    /// Sibling-local paint order override; ties keep insertion order
    pub z_index: i32,
    pub flags: NodeFlags,
    pub shader: Shader,
}

impl Default for NodeProps {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
            pivot: Pivot::CENTER,
            mount: Pivot::TOP_LEFT,
            colors: CornerColors::solid(Color::WHITE),
            alpha: 1.0,
            z_index: 0,
            flags: NodeFlags::default(),
            shader: Shader::Default,
        }
    }
}

impl NodeProps {
    /// Props for a solid rectangle at `(x, y)`.
    pub fn rect(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            ..Self::default()
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.colors = CornerColors::solid(color);
        self
    }

    pub fn with_colors(mut self, colors: CornerColors) -> Self {
        self.colors = colors;
        self
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_z_index(mut self, z_index: i32) -> Self {
        self.z_index = z_index;
        self
    }

    pub fn with_clipping(mut self, clipping: bool) -> Self {
        self.flags.set(NodeFlags::CLIPPING, clipping);
        self
    }

    pub fn with_render_to_texture(mut self, rtt: bool) -> Self {
        self.flags.set(NodeFlags::RENDER_TO_TEXTURE, rtt);
        self
    }

    pub fn with_shader(mut self, shader: Shader) -> Self {
        self.shader = shader;
        self
    }

    /// Transform from this node's local box `(0, 0, width, height)` into its
    /// parent's coordinate space.
    ///
    /// The mount point is placed at `(x, y)`; scale and rotation are applied
    /// around the pivot.
    pub fn local_transform(&self) -> Transform {
        let (mx, my) = self.mount.resolve(self.width, self.height);
        let position = Transform::translate(self.x - mx, self.y - my);

        if self.rotation == 0.0 && self.scale_x == 1.0 && self.scale_y == 1.0 {
            return position;
        }

        let (px, py) = self.pivot.resolve(self.width, self.height);
        let local = Transform::rotate(self.rotation)
            .then(&Transform::scale_xy(self.scale_x, self.scale_y))
            .center_at(px, py);
        position.then(&local)
    }

    pub fn is_visible(&self) -> bool {
        self.flags.contains(NodeFlags::VISIBLE)
    }

    pub fn is_clipping(&self) -> bool {
        self.flags.contains(NodeFlags::CLIPPING)
    }

    pub fn is_render_to_texture(&self) -> bool {
        self.flags.contains(NodeFlags::RENDER_TO_TEXTURE)
    }
}

/// Which cached state a property write invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyKind {
    /// World transform, bounds and clip of the node and its descendants
    Transform,
    /// Colors, alpha, shader or flags that only change how the node is drawn
    Paint,
    /// Sibling paint order of the node's parent
    Order,
}

/// A single property write, for drivers that apply values generically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeProperty {
    X(f32),
    Y(f32),
    Width(f32),
    Height(f32),
    ScaleX(f32),
    ScaleY(f32),
    /// Uniform scale, applied to both axes
    Scale(f32),
    Rotation(f32),
    Pivot(Pivot),
    Mount(Pivot),
    Color(Color),
    Colors(CornerColors),
    Alpha(f32),
    ZIndex(i32),
    Visible(bool),
    Clipping(bool),
    RenderToTexture(bool),
    Shader(Shader),
}

impl NodeProperty {
    pub fn dirty_kind(&self) -> DirtyKind {
        match self {
            NodeProperty::X(_)
            | NodeProperty::Y(_)
            | NodeProperty::Width(_)
            | NodeProperty::Height(_)
            | NodeProperty::ScaleX(_)
            | NodeProperty::ScaleY(_)
            | NodeProperty::Scale(_)
            | NodeProperty::Rotation(_)
            | NodeProperty::Pivot(_)
            | NodeProperty::Mount(_)
            | NodeProperty::Clipping(_) => DirtyKind::Transform,
            NodeProperty::ZIndex(_) => DirtyKind::Order,
            NodeProperty::Color(_)
            | NodeProperty::Colors(_)
            | NodeProperty::Alpha(_)
            | NodeProperty::Visible(_)
            | NodeProperty::RenderToTexture(_)
            | NodeProperty::Shader(_) => DirtyKind::Paint,
        }
    }

    /// Write the value into `props`. Returns `false` when nothing changed.
    pub fn apply(&self, props: &mut NodeProps) -> bool {
        fn write<T: PartialEq + Copy>(slot: &mut T, value: T) -> bool {
            if *slot == value {
                return false;
            }
            *slot = value;
            true
        }

        fn write_flag(flags: &mut NodeFlags, flag: NodeFlags, on: bool) -> bool {
            if flags.contains(flag) == on {
                return false;
            }
            flags.set(flag, on);
            true
        }

        match *self {
            NodeProperty::X(v) => write(&mut props.x, v),
            NodeProperty::Y(v) => write(&mut props.y, v),
            NodeProperty::Width(v) => write(&mut props.width, v),
            NodeProperty::Height(v) => write(&mut props.height, v),
            NodeProperty::ScaleX(v) => write(&mut props.scale_x, v),
            NodeProperty::ScaleY(v) => write(&mut props.scale_y, v),
            NodeProperty::Scale(v) => {
                let x = write(&mut props.scale_x, v);
                let y = write(&mut props.scale_y, v);
                x || y
            }
            NodeProperty::Rotation(v) => write(&mut props.rotation, v),
            NodeProperty::Pivot(v) => write(&mut props.pivot, v),
            NodeProperty::Mount(v) => write(&mut props.mount, v),
            NodeProperty::Color(c) => write(&mut props.colors, CornerColors::solid(c)),
            NodeProperty::Colors(c) => write(&mut props.colors, c),
            NodeProperty::Alpha(v) => write(&mut props.alpha, v.clamp(0.0, 1.0)),
            NodeProperty::ZIndex(v) => write(&mut props.z_index, v),
            NodeProperty::Visible(on) => write_flag(&mut props.flags, NodeFlags::VISIBLE, on),
            NodeProperty::Clipping(on) => write_flag(&mut props.flags, NodeFlags::CLIPPING, on),
            NodeProperty::RenderToTexture(on) => {
                write_flag(&mut props.flags, NodeFlags::RENDER_TO_TEXTURE, on)
            }
            NodeProperty::Shader(s) => write(&mut props.shader, s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_local_transform_translation_only() {
        let props = NodeProps::rect(10.0, 20.0, 50.0, 50.0);
        let t = props.local_transform();
        assert!(t.is_axis_aligned());
        let p = t.transform_point(0.0, 0.0);
        assert!(approx_eq(p.x, 10.0));
        assert!(approx_eq(p.y, 20.0));
    }

    #[test]
    fn test_mount_offsets_position() {
        let mut props = NodeProps::rect(100.0, 100.0, 40.0, 20.0);
        props.mount = Pivot::CENTER;
        let p = props.local_transform().transform_point(0.0, 0.0);
        assert!(approx_eq(p.x, 80.0));
        assert!(approx_eq(p.y, 90.0));
    }

    #[test]
    fn test_scale_around_center_pivot() {
        let mut props = NodeProps::rect(0.0, 0.0, 100.0, 100.0);
        props.scale_x = 2.0;
        props.scale_y = 2.0;
        let t = props.local_transform();
        let center = t.transform_point(50.0, 50.0);
        assert!(approx_eq(center.x, 50.0));
        assert!(approx_eq(center.y, 50.0));
        let corner = t.transform_point(0.0, 0.0);
        assert!(approx_eq(corner.x, -50.0));
        assert!(approx_eq(corner.y, -50.0));
    }

    #[test]
    fn test_apply_reports_changes() {
        let mut props = NodeProps::default();
        assert!(NodeProperty::X(5.0).apply(&mut props));
        assert!(!NodeProperty::X(5.0).apply(&mut props));
        assert!(NodeProperty::Clipping(true).apply(&mut props));
        assert!(props.is_clipping());
        assert!(!NodeProperty::Clipping(true).apply(&mut props));
        assert!(NodeProperty::Alpha(0.5).apply(&mut props));
        assert!(NodeProperty::Alpha(3.0).apply(&mut props));
        assert_eq!(props.alpha, 1.0);
        assert!(!NodeProperty::Alpha(1.5).apply(&mut props));
    }

    #[test]
    fn test_dirty_kinds() {
        assert_eq!(NodeProperty::X(0.0).dirty_kind(), DirtyKind::Transform);
        assert_eq!(NodeProperty::Alpha(0.5).dirty_kind(), DirtyKind::Paint);
        assert_eq!(NodeProperty::ZIndex(2).dirty_kind(), DirtyKind::Order);
    }
}
