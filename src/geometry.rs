//! Geometry primitives: points, axis-aligned boxes, and the boundary
//! descriptor used to construct a quadtree/octree root.
//!
//! Every index family is generic over `const D: usize` (2 or 3), so a
//! single `Point<D>`/`BBox<D>` pair serves both the 2D and 3D variants
//! spec.md names separately (`Point2D`/`Point3D`, `Box2D`/`Box3D`); see
//! DESIGN.md for the reasoning.

use derive_builder::Builder;

use crate::error::{Result, SpartError};
use crate::payload::Payload;

/// A point in `D`-dimensional space together with its opaque payload.
///
/// Points are value objects (spec.md §3): indexes store a logical copy of
/// the coordinates and the payload, and equality compares both.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point<const D: usize> {
    pub coords: [f64; D],
    pub data: Payload,
}

/// A point in the plane. Alias of [`Point<2>`].
pub type Point2 = Point<2>;
/// A point in space. Alias of [`Point<3>`].
pub type Point3 = Point<3>;

impl<const D: usize> Point<D> {
    pub fn new(coords: [f64; D], data: impl Into<Payload>) -> Self {
        Self {
            coords,
            data: data.into(),
        }
    }

    pub(crate) fn without_payload(coords: [f64; D]) -> Self {
        Self {
            coords,
            data: Payload::Null,
        }
    }
}

/// Euclidean distance between two points (spec.md §4.1).
pub fn distance<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    squared_distance(a, b).sqrt()
}

/// Squared Euclidean distance, used to prune search without a `sqrt` on the
/// hot path (spec.md §4.1).
pub fn squared_distance<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    let mut sum = 0.0;
    for i in 0..D {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum
}

/// An axis-aligned bounding box in `D` dimensions. Degenerate boxes
/// (`min == max`) are legal and represent a single point (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BBox<const D: usize> {
    pub min: [f64; D],
    pub max: [f64; D],
}

/// A box in the plane. Alias of [`BBox<2>`].
pub type Box2 = BBox<2>;
/// A box in space. Alias of [`BBox<3>`].
pub type Box3 = BBox<3>;

impl<const D: usize> BBox<D> {
    pub fn from_point(p: &[f64; D]) -> Self {
        Self { min: *p, max: *p }
    }

    /// The tight union of two boxes.
    pub fn union(&self, other: &Self) -> Self {
        let mut min = [0.0; D];
        let mut max = [0.0; D];
        for i in 0..D {
            min[i] = self.min[i].min(other.min[i]);
            max[i] = self.max[i].max(other.max[i]);
        }
        Self { min, max }
    }

    pub fn union_point(&self, p: &[f64; D]) -> Self {
        self.union(&Self::from_point(p))
    }

    /// Whether this box intersects `other` (closed on both sides).
    pub fn intersects(&self, other: &Self) -> bool {
        for i in 0..D {
            if self.max[i] < other.min[i] || other.max[i] < self.min[i] {
                return false;
            }
        }
        true
    }

    /// Whether this box wholly contains `other`.
    pub fn contains_box(&self, other: &Self) -> bool {
        for i in 0..D {
            if other.min[i] < self.min[i] || other.max[i] > self.max[i] {
                return false;
            }
        }
        true
    }

    /// Area (`D=2`) or volume (`D=3`) of this box.
    pub fn area(&self) -> f64 {
        let mut a = 1.0;
        for i in 0..D {
            a *= (self.max[i] - self.min[i]).max(0.0);
        }
        a
    }

    /// Sum of the box's edge lengths (used by the R*-tree's margin
    /// criterion, spec.md §4.5).
    pub fn margin(&self) -> f64 {
        let mut m = 0.0;
        for i in 0..D {
            m += (self.max[i] - self.min[i]).max(0.0);
        }
        m
    }

    /// Area of the intersection of two boxes (0 if disjoint).
    pub fn overlap(&self, other: &Self) -> f64 {
        let mut a = 1.0;
        for i in 0..D {
            let lo = self.min[i].max(other.min[i]);
            let hi = self.max[i].min(other.max[i]);
            if hi <= lo {
                return 0.0;
            }
            a *= hi - lo;
        }
        a
    }

    /// `area(union(self, other)) - area(self)`: how much `self` must grow
    /// to also cover `other`.
    pub fn enlargement(&self, other: &Self) -> f64 {
        self.union(other).area() - self.area()
    }

    pub fn enlargement_point(&self, p: &[f64; D]) -> f64 {
        self.enlargement(&Self::from_point(p))
    }

    pub fn center(&self) -> [f64; D] {
        let mut c = [0.0; D];
        for i in 0..D {
            c[i] = (self.min[i] + self.max[i]) / 2.0;
        }
        c
    }

    /// The distance from `point` to the closest point on/in this box
    /// (spec.md §4.1): clamp the query's coordinate into `[min, max]` on
    /// each axis, then take the Euclidean distance to the clamp. Zero for
    /// a point inside the box.
    pub fn min_distance(&self, point: &[f64; D]) -> f64 {
        self.min_squared_distance(point).sqrt()
    }

    pub fn min_squared_distance(&self, point: &[f64; D]) -> f64 {
        let mut sum = 0.0;
        for i in 0..D {
            let clamped = point[i].clamp(self.min[i], self.max[i]);
            let d = point[i] - clamped;
            sum += d * d;
        }
        sum
    }

    /// Whether `ball(center, radius)` intersects this box.
    pub fn intersects_ball(&self, center: &[f64; D], radius: f64) -> bool {
        self.min_squared_distance(center) <= radius * radius
    }
}

/// The root region of a quadtree/octree: an origin plus positive extents on
/// every axis (width/height[/depth]). Built through [`BoundaryBuilder`] so
/// that non-positive extents are rejected before construction, matching
/// spec.md §7's `InvalidArgument`.
#[derive(Debug, Clone, Copy, PartialEq, Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct Boundary<const D: usize> {
    pub origin: [f64; D],
    pub extent: [f64; D],
}

impl<const D: usize> BoundaryBuilder<D> {
    fn validate(&self) -> std::result::Result<(), String> {
        let extent = self.extent.unwrap_or([0.0; D]);
        if extent.iter().any(|e| *e <= 0.0) {
            return Err("boundary extent must be positive on every axis".to_string());
        }
        Ok(())
    }
}

impl<const D: usize> Boundary<D> {
    pub fn new(origin: [f64; D], extent: [f64; D]) -> Result<Self> {
        BoundaryBuilder::default()
            .origin(origin)
            .extent(extent)
            .build()
            .map_err(|e| SpartError::InvalidArgument(e.to_string()))
    }

    /// Closed-inclusive containment test (spec.md §3): a point is inside
    /// iff `origin[i] <= p[i] <= origin[i] + extent[i]` on every axis.
    pub fn contains(&self, p: &[f64; D]) -> bool {
        for i in 0..D {
            if p[i] < self.origin[i] || p[i] > self.origin[i] + self.extent[i] {
                return false;
            }
        }
        true
    }

    pub fn as_box(&self) -> BBox<D> {
        let mut max = [0.0; D];
        for i in 0..D {
            max[i] = self.origin[i] + self.extent[i];
        }
        BBox {
            min: self.origin,
            max,
        }
    }

    pub fn center(&self) -> [f64; D] {
        self.as_box().center()
    }

    /// The `1 << D` children obtained by bisecting every axis at the
    /// center, in the fixed tie-break order spec.md §4.2 requires: for
    /// `D=2` this is NW, NE, SW, SE; for `D=3` the octants in
    /// lexicographic order on the (x, y, z) halves.
    pub fn split(&self) -> Vec<Boundary<D>> {
        let center = self.center();
        let count = 1usize << D;
        // Bit `D-1-axis` of the mask selects the half on `axis` (0 = lower,
        // 1 = upper), so axis 0 (x) is the most-significant bit and walking
        // masks 0..count in order enumerates children in lexicographic
        // order on (x, y, [z]) -- exactly the octant order spec.md §4.2
        // requires for octrees.
        let mut children = Vec::with_capacity(count);
        for mask in 0..count {
            let mut origin = [0.0; D];
            let mut extent = [0.0; D];
            for axis in 0..D {
                let upper = (mask >> (D - 1 - axis)) & 1 == 1;
                if upper {
                    origin[axis] = center[axis];
                    extent[axis] = self.origin[axis] + self.extent[axis] - center[axis];
                } else {
                    origin[axis] = self.origin[axis];
                    extent[axis] = center[axis] - self.origin[axis];
                }
            }
            children.push(Boundary { origin, extent });
        }
        if D == 2 {
            // Lexicographic-on-(x,y) order is SW, NW, SE, NE; spec.md §4.2
            // additionally names a fixed quadtree tie-break order of NW,
            // NE, SW, SE, so the four 2D children are permuted to match.
            vec![children[1], children[3], children[0], children[2]]
        } else {
            children
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_rejects_non_positive_extent() {
        assert!(Boundary::<2>::new([0.0, 0.0], [0.0, 1.0]).is_err());
        assert!(Boundary::<2>::new([0.0, 0.0], [1.0, -1.0]).is_err());
    }

    #[test]
    fn boundary_containment_is_closed() {
        let b = Boundary::<2>::new([0.0, 0.0], [10.0, 10.0]).unwrap();
        assert!(b.contains(&[0.0, 0.0]));
        assert!(b.contains(&[10.0, 10.0]));
        assert!(!b.contains(&[10.1, 5.0]));
    }

    #[test]
    fn quadrant_split_order_matches_spec() {
        let b = Boundary::<2>::new([0.0, 0.0], [4.0, 4.0]).unwrap();
        let kids = b.split();
        assert_eq!(kids.len(), 4);
        // NW: low x, high y
        assert_eq!(kids[0].origin, [0.0, 2.0]);
        // NE: high x, high y
        assert_eq!(kids[1].origin, [2.0, 2.0]);
        // SW: low x, low y
        assert_eq!(kids[2].origin, [0.0, 0.0]);
        // SE: high x, low y
        assert_eq!(kids[3].origin, [2.0, 0.0]);
    }

    #[test]
    fn min_distance_zero_inside() {
        let b = BBox {
            min: [0.0, 0.0],
            max: [10.0, 10.0],
        };
        assert_eq!(b.min_distance(&[5.0, 5.0]), 0.0);
        assert!((b.min_distance(&[15.0, 0.0]) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn area_and_union() {
        let a = BBox {
            min: [0.0, 0.0],
            max: [1.0, 1.0],
        };
        let b = BBox {
            min: [2.0, 2.0],
            max: [3.0, 3.0],
        };
        assert_eq!(a.area(), 1.0);
        assert_eq!(a.union(&b).area(), 9.0);
        assert_eq!(a.overlap(&b), 0.0);
    }
}
