use crate::geometry::{Point, Rect};

/// A 2x3 affine transformation matrix stored in row-major order.
///
/// Used for 2D transformations (translate, rotate, scale) that compose
/// parent→child. The implicit third row is `[0, 0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    /// Matrix data in row-major order: [a, b, tx, c, d, ty]
    pub data: [f32; 6],
}

impl Transform {
    /// Identity matrix (no transformation)
    pub const IDENTITY: Self = Self {
        data: [
            1.0, 0.0, 0.0, // row 0
            0.0, 1.0, 0.0, // row 1
        ],
    };

    /// Create an identity transform
    pub fn identity() -> Self {
        Self::IDENTITY
    }

    /// Create a translation transform
    pub fn translate(x: f32, y: f32) -> Self {
        Self {
            data: [
                1.0, 0.0, x, // row 0
                0.0, 1.0, y, // row 1
            ],
        }
    }

    /// Create a rotation transform (radians, clockwise in screen space)
    pub fn rotate(angle_radians: f32) -> Self {
        let cos = angle_radians.cos();
        let sin = angle_radians.sin();
        Self {
            data: [
                cos, -sin, 0.0, // row 0
                sin, cos, 0.0, // row 1
            ],
        }
    }

    /// Create a rotation transform from degrees
    pub fn rotate_degrees(angle_degrees: f32) -> Self {
        Self::rotate(angle_degrees.to_radians())
    }

    /// Create a non-uniform scale transform
    pub fn scale_xy(sx: f32, sy: f32) -> Self {
        Self {
            data: [
                sx, 0.0, 0.0, // row 0
                0.0, sy, 0.0, // row 1
            ],
        }
    }

    /// Compose this transform with another: self * other
    /// Applies `other` first, then `self`.
    pub fn then(&self, other: &Transform) -> Transform {
        let [a0, b0, tx0, c0, d0, ty0] = self.data;
        let [a1, b1, tx1, c1, d1, ty1] = other.data;

        Transform {
            data: [
                a0 * a1 + b0 * c1,
                a0 * b1 + b0 * d1,
                a0 * tx1 + b0 * ty1 + tx0,
                c0 * a1 + d0 * c1,
                c0 * b1 + d0 * d1,
                c0 * tx1 + d0 * ty1 + ty0,
            ],
        }
    }

    /// Re-center this transform so it pivots around `(ox, oy)` instead of the origin.
    pub fn center_at(&self, ox: f32, oy: f32) -> Transform {
        Transform::translate(ox, oy)
            .then(self)
            .then(&Transform::translate(-ox, -oy))
    }

    /// Compute the inverse of this transform.
    ///
    /// Degenerate matrices (zero scale) have no inverse and yield `None`.
    pub fn inverse(&self) -> Option<Transform> {
        let [a, b, tx, c, d, ty] = self.data;
        let det = a * d - b * c;

        if det.abs() < 1e-10 {
            return None;
        }

        let inv_det = 1.0 / det;

        Some(Transform {
            data: [
                d * inv_det,
                -b * inv_det,
                (-d * tx + b * ty) * inv_det,
                -c * inv_det,
                a * inv_det,
                (c * tx - a * ty) * inv_det,
            ],
        })
    }

    /// Transform a 2D point by this matrix
    pub fn transform_point(&self, x: f32, y: f32) -> Point {
        let [a, b, tx, c, d, ty] = self.data;
        Point::new(a * x + b * y + tx, c * x + d * y + ty)
    }

    /// Transform a rect and return the axis-aligned bounding box of the result.
    ///
    /// Rotated rects become the AABB of their four corners.
    pub fn transform_rect(&self, rect: &Rect) -> Rect {
        if self.is_axis_aligned() {
            let p0 = self.transform_point(rect.x, rect.y);
            let p1 = self.transform_point(rect.max_x(), rect.max_y());
            return Rect::from_corners(p0.x.min(p1.x), p0.y.min(p1.y), p0.x.max(p1.x), p0.y.max(p1.y));
        }
        Rect::from_points(&[
            self.transform_point(rect.x, rect.y),
            self.transform_point(rect.max_x(), rect.y),
            self.transform_point(rect.x, rect.max_y()),
            self.transform_point(rect.max_x(), rect.max_y()),
        ])
    }

    pub fn tx(&self) -> f32 {
        self.data[2]
    }

    pub fn ty(&self) -> f32 {
        self.data[5]
    }

    /// True when the matrix has no rotation or skew component.
    pub fn is_axis_aligned(&self) -> bool {
        self.data[1] == 0.0 && self.data[3] == 0.0
    }

    /// Check if this is the identity transform
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Get the matrix as two rows, padded for GPU upload.
    pub fn rows(&self) -> [[f32; 4]; 2] {
        let [a, b, tx, c, d, ty] = self.data;
        [[a, b, tx, 0.0], [c, d, ty, 0.0]]
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_identity() {
        let t = Transform::identity();
        assert_eq!(t, Transform::IDENTITY);
        assert!(t.is_identity());
    }

    #[test]
    fn test_translate() {
        let t = Transform::translate(10.0, 20.0);
        let p = t.transform_point(5.0, 5.0);
        assert!(approx_eq(p.x, 15.0));
        assert!(approx_eq(p.y, 25.0));
    }

    #[test]
    fn test_rotate() {
        let t = Transform::rotate_degrees(90.0);
        let p = t.transform_point(1.0, 0.0);
        assert!(approx_eq(p.x, 0.0));
        assert!(approx_eq(p.y, 1.0));
    }

    #[test]
    fn test_compose() {
        // Point (0,0) -> translate -> (10,0) -> scale -> (20,0)
        let composed = Transform::scale_xy(2.0, 2.0).then(&Transform::translate(10.0, 0.0));
        let p = composed.transform_point(0.0, 0.0);
        assert!(approx_eq(p.x, 20.0));
        assert!(approx_eq(p.y, 0.0));
    }

    #[test]
    fn test_center_at_keeps_pivot_fixed() {
        let t = Transform::rotate_degrees(90.0).center_at(50.0, 50.0);
        let p = t.transform_point(50.0, 50.0);
        assert!(approx_eq(p.x, 50.0));
        assert!(approx_eq(p.y, 50.0));

        let corner = t.transform_point(0.0, 0.0);
        assert!(approx_eq(corner.x, 100.0));
        assert!(approx_eq(corner.y, 0.0));
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = Transform::translate(10.0, 20.0)
            .then(&Transform::rotate_degrees(30.0))
            .then(&Transform::scale_xy(2.0, 0.5));
        let inv = t.inverse().unwrap();
        let p = t.then(&inv).transform_point(3.0, 4.0);
        assert!(approx_eq(p.x, 3.0));
        assert!(approx_eq(p.y, 4.0));
    }

    #[test]
    fn test_degenerate_inverse() {
        assert!(Transform::scale_xy(0.0, 1.0).inverse().is_none());
    }

    #[test]
    fn test_transform_rect_rotated_aabb() {
        let t = Transform::rotate_degrees(45.0);
        let r = t.transform_rect(&Rect::new(0.0, 0.0, 10.0, 10.0));
        let diag = 10.0 * std::f32::consts::SQRT_2;
        assert!(approx_eq(r.width, diag));
        assert!(approx_eq(r.height, diag));
    }

    #[test]
    fn test_transform_rect_negative_scale() {
        let t = Transform::scale_xy(-1.0, 1.0);
        let r = t.transform_rect(&Rect::new(10.0, 0.0, 5.0, 5.0));
        assert_eq!(r, Rect::new(-15.0, 0.0, 5.0, 5.0));
    }
}
