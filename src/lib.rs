//! In-memory spatial indexes over 2D/3D point data: a point-region
//! quadtree/octree, a k-d tree, an R-tree, and an R*-tree, all generic over
//! the number of dimensions `D` (2 or 3) so the same type family serves
//! both planar and spatial data.
//!
//! Every index stores `(coordinates, payload)` pairs and supports
//! insertion (one at a time or in bulk), deletion by exact match,
//! k-nearest-neighbor search, radius range search, and a shared binary
//! save/load format (see [`codec`]). [`SpatialIndex`] abstracts over the
//! four families for callers that want to pick one at runtime.
//!
//! ```
//! use spart::{Boundary, Payload, Point, Quadtree};
//!
//! let boundary = Boundary::new([0.0, 0.0], [100.0, 100.0]).unwrap();
//! let mut tree = Quadtree::new(boundary, 4).unwrap();
//! tree.insert(Point::new([10.0, 20.0], Payload::from("a")));
//! let nearest = tree.knn_search(&[11.0, 19.0], 1).unwrap();
//! assert_eq!(nearest.len(), 1);
//! ```

pub mod codec;
pub mod error;
pub mod geometry;
pub mod kdtree;
pub mod payload;
pub mod quadtree;
pub mod rtree;

use std::io::{Read, Write};

pub use error::{Result, SpartError};
pub use geometry::{BBox, Boundary, BoundaryBuilder, Box2, Box3, Point, Point2, Point3};
pub use kdtree::{KdTree, KdTree2, KdTree3};
pub use payload::Payload;
pub use quadtree::{Octree, Quadtree, RegionTree};
pub use rtree::classic::{RTree, RTree2, RTree3};
pub use rtree::star::{RStarTree, RStarTree2, RStarTree3};

/// Common operations every index family supports, for callers that want to
/// abstract over which family backs a given index.
///
/// `insert` always returns whether the point was added (a quadtree/octree
/// can reject a point outside its boundary; the other families always
/// accept). Method names match each family's own inherent methods of the
/// same signature, so most callers never need to name this trait directly.
pub trait SpatialIndex<const D: usize>: Sized {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&mut self, p: Point<D>) -> bool;

    fn delete(&mut self, coords: &[f64; D], data: &Payload) -> bool;

    fn knn_search(&self, q: &[f64; D], k: usize) -> Result<Vec<Point<D>>>;

    fn range_search(&self, q: &[f64; D], r: f64) -> Result<Vec<Point<D>>>;

    fn save<W: Write>(&self, w: &mut W) -> Result<()>;

    fn load<R: Read>(r: &mut R) -> Result<Self>;
}

impl<const D: usize> SpatialIndex<D> for RegionTree<D> {
    fn len(&self) -> usize {
        RegionTree::len(self)
    }

    fn insert(&mut self, p: Point<D>) -> bool {
        RegionTree::insert(self, p)
    }

    fn delete(&mut self, coords: &[f64; D], data: &Payload) -> bool {
        RegionTree::delete(self, coords, data)
    }

    fn knn_search(&self, q: &[f64; D], k: usize) -> Result<Vec<Point<D>>> {
        RegionTree::knn_search(self, q, k)
    }

    fn range_search(&self, q: &[f64; D], r: f64) -> Result<Vec<Point<D>>> {
        RegionTree::range_search(self, q, r)
    }

    fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        RegionTree::save(self, w)
    }

    fn load<R: Read>(r: &mut R) -> Result<Self> {
        RegionTree::load(r)
    }
}

impl<const D: usize> SpatialIndex<D> for KdTree<D> {
    fn len(&self) -> usize {
        KdTree::len(self)
    }

    fn insert(&mut self, p: Point<D>) -> bool {
        KdTree::insert(self, p);
        true
    }

    fn delete(&mut self, coords: &[f64; D], data: &Payload) -> bool {
        KdTree::delete(self, coords, data)
    }

    fn knn_search(&self, q: &[f64; D], k: usize) -> Result<Vec<Point<D>>> {
        KdTree::knn_search(self, q, k)
    }

    fn range_search(&self, q: &[f64; D], r: f64) -> Result<Vec<Point<D>>> {
        KdTree::range_search(self, q, r)
    }

    fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        KdTree::save(self, w)
    }

    fn load<R: Read>(r: &mut R) -> Result<Self> {
        KdTree::load(r)
    }
}

impl<const D: usize> SpatialIndex<D> for RTree<D> {
    fn len(&self) -> usize {
        RTree::len(self)
    }

    fn insert(&mut self, p: Point<D>) -> bool {
        RTree::insert(self, p);
        true
    }

    fn delete(&mut self, coords: &[f64; D], data: &Payload) -> bool {
        RTree::delete(self, coords, data)
    }

    fn knn_search(&self, q: &[f64; D], k: usize) -> Result<Vec<Point<D>>> {
        RTree::knn_search(self, q, k)
    }

    fn range_search(&self, q: &[f64; D], r: f64) -> Result<Vec<Point<D>>> {
        RTree::range_search(self, q, r)
    }

    fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        RTree::save(self, w)
    }

    fn load<R: Read>(r: &mut R) -> Result<Self> {
        RTree::load(r)
    }
}

impl<const D: usize> SpatialIndex<D> for RStarTree<D> {
    fn len(&self) -> usize {
        RStarTree::len(self)
    }

    fn insert(&mut self, p: Point<D>) -> bool {
        RStarTree::insert(self, p);
        true
    }

    fn delete(&mut self, coords: &[f64; D], data: &Payload) -> bool {
        RStarTree::delete(self, coords, data)
    }

    fn knn_search(&self, q: &[f64; D], k: usize) -> Result<Vec<Point<D>>> {
        RStarTree::knn_search(self, q, k)
    }

    fn range_search(&self, q: &[f64; D], r: f64) -> Result<Vec<Point<D>>> {
        RStarTree::range_search(self, q, r)
    }

    fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        RStarTree::save(self, w)
    }

    fn load<R: Read>(r: &mut R) -> Result<Self> {
        RStarTree::load(r)
    }
}
