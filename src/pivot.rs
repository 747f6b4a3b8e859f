/// A fractional anchor point within a node's own `width x height` box.
///
/// The same type serves two roles on a node:
/// - **pivot**: the point around which rotation and scale are applied
///   (defaults to [`Pivot::CENTER`]).
/// - **mount**: the point of the node that is placed at its `(x, y)` position
///   (defaults to [`Pivot::TOP_LEFT`]).
///
/// # Example
/// ```ignore
/// // Rotate around the bottom-right corner
/// tree.set_pivot(node, Pivot::BOTTOM_RIGHT);
///
/// // Center the node on its position
/// tree.set_mount(node, Pivot::CENTER);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pivot {
    /// Horizontal fraction (0.0 = left edge, 1.0 = right edge)
    pub x: f32,
    /// Vertical fraction (0.0 = top edge, 1.0 = bottom edge)
    pub y: f32,
}

impl Pivot {
    /// Center of the node (0.5, 0.5)
    pub const CENTER: Self = Self::new(0.5, 0.5);

    /// Top-left corner (0, 0)
    pub const TOP_LEFT: Self = Self::new(0.0, 0.0);

    /// Top center (0.5, 0)
    pub const TOP: Self = Self::new(0.5, 0.0);

    /// Top-right corner (1, 0)
    pub const TOP_RIGHT: Self = Self::new(1.0, 0.0);

    /// Center left (0, 0.5)
    pub const LEFT: Self = Self::new(0.0, 0.5);

    /// Center right (1, 0.5)
    pub const RIGHT: Self = Self::new(1.0, 0.5);

    /// Bottom-left corner (0, 1)
    pub const BOTTOM_LEFT: Self = Self::new(0.0, 1.0);

    /// Bottom center (0.5, 1)
    pub const BOTTOM: Self = Self::new(0.5, 1.0);

    /// Bottom-right corner (1, 1)
    pub const BOTTOM_RIGHT: Self = Self::new(1.0, 1.0);

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Resolve to an offset inside a `width x height` box.
    pub fn resolve(&self, width: f32, height: f32) -> (f32, f32) {
        (width * self.x, height * self.y)
    }
}

impl Default for Pivot {
    fn default() -> Self {
        Self::CENTER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_constants() {
        let (x, y) = Pivot::CENTER.resolve(200.0, 100.0);
        assert!(approx_eq(x, 100.0));
        assert!(approx_eq(y, 50.0));

        let (x, y) = Pivot::TOP_LEFT.resolve(200.0, 100.0);
        assert!(approx_eq(x, 0.0));
        assert!(approx_eq(y, 0.0));

        let (x, y) = Pivot::BOTTOM_RIGHT.resolve(200.0, 100.0);
        assert!(approx_eq(x, 200.0));
        assert!(approx_eq(y, 100.0));

        let (x, y) = Pivot::RIGHT.resolve(200.0, 100.0);
        assert!(approx_eq(x, 200.0));
        assert!(approx_eq(y, 50.0));
    }

    #[test]
    fn test_fractional() {
        let (x, y) = Pivot::new(0.25, 0.75).resolve(100.0, 200.0);
        assert!(approx_eq(x, 25.0));
        assert!(approx_eq(y, 150.0));
    }

    #[test]
    fn test_default() {
        assert_eq!(Pivot::default(), Pivot::CENTER);
    }
}
