//! Point-region quadtree (`D = 2`) and octree (`D = 3`), generalized as
//! `RegionTree<const D: usize>` (spec.md §4.2).
//!
//! A node is either a leaf holding up to `capacity` points, or an internal
//! node with exactly `1 << D` children that tile its region by equal
//! subdivision. Once a node is split it never merges back on delete
//! (spec.md §4.2 "no node-merging is performed on delete").

use std::collections::BinaryHeap;
use std::io::{Read, Write};

use ordered_float::OrderedFloat;

use crate::codec;
use crate::error::{Result, SpartError};
use crate::geometry::{Boundary, Point};

/// Caps how many times a node will subdivide along one insertion path.
/// Coincident points (equal coordinates, distinct payloads — a legal input
/// per spec.md §3/§8) always land in the same child after any number of
/// bisections, so without a cap a leaf that is full of duplicates would
/// subdivide forever on the next insert. Past this depth a full leaf simply
/// keeps accepting points past `capacity` rather than recursing again; 64
/// halvings of an `f64` extent is already well past the point where
/// `center` stops moving due to floating-point rounding, so this only ever
/// engages for genuinely coincident (or float-indistinguishable) points.
const MAX_DEPTH: usize = 64;

struct Node<const D: usize> {
    region: Boundary<D>,
    points: Vec<Point<D>>,
    children: Option<Vec<Node<D>>>,
}

impl<const D: usize> Node<D> {
    fn new(region: Boundary<D>) -> Self {
        Self {
            region,
            points: Vec::new(),
            children: None,
        }
    }

    fn insert(&mut self, p: Point<D>, capacity: usize, depth: usize) -> bool {
        if !self.region.contains(&p.coords) {
            return false;
        }
        if self.children.is_none() {
            if self.points.len() < capacity || depth >= MAX_DEPTH {
                self.points.push(p);
                return true;
            }
            self.subdivide(capacity, depth);
        }
        let children = self.children.as_mut().expect("just subdivided");
        for child in children.iter_mut() {
            if child.region.contains(&p.coords) {
                return child.insert(p, capacity, depth + 1);
            }
        }
        unreachable!("closed boundary subdivision always covers every contained point");
    }

    fn subdivide(&mut self, capacity: usize, depth: usize) {
        let mut children: Vec<Node<D>> = self
            .region
            .split()
            .into_iter()
            .map(Node::new)
            .collect();
        for p in self.points.drain(..) {
            for child in children.iter_mut() {
                if child.region.contains(&p.coords) {
                    // Children are never pre-filled past capacity here: a
                    // redistribution can't itself trigger another split
                    // because each child starts empty and receives at most
                    // the parent's `capacity` points. The depth cap above
                    // bounds how many times this recursion can nest.
                    let _ = child.insert(p, capacity, depth + 1);
                    break;
                }
            }
        }
        self.children = Some(children);
    }

    fn delete(&mut self, coords: &[f64; D], data: &crate::payload::Payload) -> bool {
        if !self.region.contains(coords) {
            return false;
        }
        if let Some(idx) = self
            .points
            .iter()
            .position(|p| &p.coords == coords && &p.data == data)
        {
            self.points.remove(idx);
            return true;
        }
        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                if child.delete(coords, data) {
                    return true;
                }
            }
        }
        false
    }

}

/// A point-region index parameterized by dimensionality. `Quadtree` and
/// `Octree` are aliases for `D = 2` and `D = 3`.
pub struct RegionTree<const D: usize> {
    capacity: usize,
    root: Node<D>,
    len: usize,
}

/// A 2D point-region quadtree.
pub type Quadtree = RegionTree<2>;
/// A 3D point-region octree.
pub type Octree = RegionTree<3>;

impl<const D: usize> RegionTree<D> {
    /// Constructs an empty tree rooted at `boundary` with per-node capacity
    /// `capacity`. `capacity == 0` is an `InvalidArgument` (spec.md §7).
    pub fn new(boundary: Boundary<D>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(SpartError::InvalidArgument(
                "capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            root: Node::new(boundary),
            len: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn boundary(&self) -> Boundary<D> {
        self.root.region
    }

    /// Inserts `p`. Returns `false` without effect if `p` lies outside the
    /// root boundary (spec.md §6); this is not an error.
    pub fn insert(&mut self, p: Point<D>) -> bool {
        let inserted = self.root.insert(p, self.capacity, 0);
        if inserted {
            self.len += 1;
        }
        inserted
    }

    /// Inserts every point in `ps`, equivalent to inserting them one at a
    /// time (spec.md §8 "Bulk equivalence").
    pub fn insert_bulk(&mut self, ps: impl IntoIterator<Item = Point<D>>) {
        for p in ps {
            self.insert(p);
        }
    }

    /// Removes one point equal (coordinates and payload) to `p`'s
    /// description, first match in leaf scan order (spec.md §4.2).
    pub fn delete(&mut self, coords: &[f64; D], data: &crate::payload::Payload) -> bool {
        let removed = self.root.delete(coords, data);
        if removed {
            self.len -= 1;
        }
        removed
    }

    /// Best-first kNN search with a min-heap keyed by `min_distance`
    /// (spec.md §4.2). `k == 0` returns an empty result; `k` larger than
    /// the population returns every stored point.
    pub fn knn_search(&self, q: &[f64; D], k: usize) -> Result<Vec<Point<D>>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        // Min-heap of candidate regions, ordered by ascending min_distance.
        let mut frontier: BinaryHeap<std::cmp::Reverse<(OrderedFloat<f64>, usize)>> =
            BinaryHeap::new();
        let mut nodes: Vec<&Node<D>> = vec![&self.root];
        frontier.push(std::cmp::Reverse((
            OrderedFloat(self.root.region.as_box().min_distance(q)),
            0,
        )));

        // Bounded max-heap of the k best results seen so far, by distance.
        let mut best: BinaryHeap<(OrderedFloat<f64>, usize, usize)> = BinaryHeap::new();
        let mut best_points: Vec<Point<D>> = Vec::new();
        let mut seq = 0usize;

        while let Some(std::cmp::Reverse((dist, idx))) = frontier.pop() {
            if best.len() >= k {
                if let Some((worst, _, _)) = best.peek() {
                    if dist.0 > worst.0 {
                        break;
                    }
                }
            }
            let node = nodes[idx];
            match &node.children {
                None => {
                    for p in &node.points {
                        let d = crate::geometry::distance(&p.coords, q);
                        if best.len() < k {
                            best.push((OrderedFloat(d), seq, best_points.len()));
                            best_points.push(p.clone());
                            seq += 1;
                        } else if let Some((worst, _, _)) = best.peek().copied() {
                            if d < worst.0 {
                                best.pop();
                                best.push((OrderedFloat(d), seq, best_points.len()));
                                best_points.push(p.clone());
                                seq += 1;
                            }
                        }
                    }
                }
                Some(children) => {
                    for child in children {
                        let child_dist = child.region.as_box().min_distance(q);
                        let admit = if best.len() < k {
                            true
                        } else {
                            best.peek().map(|(w, _, _)| child_dist < w.0).unwrap_or(true)
                        };
                        if admit {
                            nodes.push(child);
                            frontier.push(std::cmp::Reverse((
                                OrderedFloat(child_dist),
                                nodes.len() - 1,
                            )));
                        }
                    }
                }
            }
        }

        let mut ordered: Vec<(OrderedFloat<f64>, usize, usize)> = best.into_vec();
        ordered.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        Ok(ordered.into_iter().map(|(_, _, i)| best_points[i].clone()).collect())
    }

    /// Depth-first range search, returning every point within `r` of `q`
    /// (spec.md §4.2). `r < 0` is an `InvalidArgument`.
    pub fn range_search(&self, q: &[f64; D], r: f64) -> Result<Vec<Point<D>>> {
        if r < 0.0 {
            return Err(SpartError::InvalidArgument(
                "radius must be non-negative".to_string(),
            ));
        }
        let mut out = Vec::new();
        Self::range_search_node(&self.root, q, r, &mut out);
        Ok(out)
    }

    fn range_search_node(node: &Node<D>, q: &[f64; D], r: f64, out: &mut Vec<Point<D>>) {
        if !node.region.as_box().intersects_ball(q, r) {
            return;
        }
        match &node.children {
            None => {
                for p in &node.points {
                    if crate::geometry::distance(&p.coords, q) <= r {
                        out.push(p.clone());
                    }
                }
            }
            Some(children) => {
                for child in children {
                    Self::range_search_node(child, q, r, out);
                }
            }
        }
    }

    /// Persists this tree to `w` in the format described by spec.md §6.
    pub fn save(&self, w: &mut impl Write) -> Result<()> {
        codec::write_magic(w, &Self::magic())?;
        codec::write_u16(w, codec::CURRENT_VERSION)?;
        codec::write_u32(w, self.capacity as u32)?;
        for c in self.root.region.origin {
            codec::write_f64(w, c)?;
        }
        for c in self.root.region.extent {
            codec::write_f64(w, c)?;
        }
        Self::write_node(w, &self.root)?;
        Ok(())
    }

    fn write_node(w: &mut impl Write, node: &Node<D>) -> Result<()> {
        match &node.children {
            None => {
                w.write_all(&[codec::TAG_LEAF])?;
                codec::write_u32(w, node.points.len() as u32)?;
                for p in &node.points {
                    codec::write_point(w, p)?;
                }
            }
            Some(children) => {
                w.write_all(&[codec::TAG_INTERNAL])?;
                codec::write_u32(w, children.len() as u32)?;
                for child in children {
                    Self::write_node(w, child)?;
                }
            }
        }
        Ok(())
    }

    /// Reconstructs a tree previously written by [`Self::save`].
    pub fn load(r: &mut impl Read) -> Result<Self> {
        codec::read_and_check_header(r, &Self::magic())?;
        let capacity = codec::read_u32(r)? as usize;
        if capacity == 0 {
            return Err(SpartError::Format("capacity must be at least 1".to_string()));
        }
        let mut origin = [0.0f64; D];
        for c in origin.iter_mut() {
            *c = codec::read_f64(r)?;
        }
        let mut extent = [0.0f64; D];
        for c in extent.iter_mut() {
            *c = codec::read_f64(r)?;
        }
        let boundary = Boundary::new(origin, extent)
            .map_err(|e| SpartError::Format(format!("invalid boundary: {e}")))?;
        let root = Self::read_node(r, boundary)?;
        let len = Self::count(&root);
        Ok(Self {
            capacity,
            root,
            len,
        })
    }

    fn read_node(r: &mut impl Read, region: Boundary<D>) -> Result<Node<D>> {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)?;
        let count = codec::read_u32(r)? as usize;
        match tag[0] {
            codec::TAG_LEAF => {
                let mut points = Vec::with_capacity(count);
                for _ in 0..count {
                    points.push(codec::read_point(r)?);
                }
                Ok(Node {
                    region,
                    points,
                    children: None,
                })
            }
            codec::TAG_INTERNAL => {
                let child_regions = region.split();
                if count != child_regions.len() {
                    return Err(SpartError::Format(format!(
                        "expected {} children, found {}",
                        child_regions.len(),
                        count
                    )));
                }
                let mut children = Vec::with_capacity(count);
                for child_region in child_regions {
                    children.push(Self::read_node(r, child_region)?);
                }
                Ok(Node {
                    region,
                    points: Vec::new(),
                    children: Some(children),
                })
            }
            other => Err(SpartError::Format(format!("unknown node tag {other}"))),
        }
    }

    fn count(node: &Node<D>) -> usize {
        match &node.children {
            None => node.points.len(),
            Some(children) => children.iter().map(Self::count).sum(),
        }
    }

    fn magic() -> [u8; 4] {
        if D == 2 {
            *b"QUAD"
        } else {
            *b"OCTR"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;

    fn pt(coords: [f64; 2], label: &str) -> Point<2> {
        Point::new(coords, Payload::Str(label.to_string()))
    }

    #[test]
    fn quadtree_knn_scenario() {
        let mut qt = Quadtree::new(Boundary::new([0.0, 0.0], [100.0, 100.0]).unwrap(), 4).unwrap();
        qt.insert(pt([10.0, 20.0], "a"));
        qt.insert(pt([80.0, 30.0], "b"));
        qt.insert(pt([45.0, 70.0], "c"));
        let result = qt.knn_search(&[12.0, 22.0], 1).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].data, Payload::Str("a".to_string()));
    }

    #[test]
    fn quadtree_rejects_out_of_region() {
        let mut qt = Quadtree::new(Boundary::new([0.0, 0.0], [100.0, 100.0]).unwrap(), 4).unwrap();
        qt.insert(pt([10.0, 20.0], "a"));
        assert!(!qt.insert(pt([150.0, 150.0], "z")));
        assert_eq!(qt.len(), 1);
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(Quadtree::new(Boundary::new([0.0, 0.0], [1.0, 1.0]).unwrap(), 0).is_err());
    }

    #[test]
    fn split_and_requery() {
        let mut qt = Quadtree::new(Boundary::new([0.0, 0.0], [16.0, 16.0]).unwrap(), 1).unwrap();
        for (i, coord) in [[1.0, 1.0], [2.0, 2.0], [14.0, 14.0]].into_iter().enumerate() {
            qt.insert(pt(coord, &i.to_string()));
        }
        assert_eq!(qt.len(), 3);
        let hits = qt.range_search(&[0.0, 0.0], 5.0).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn coincident_points_beyond_capacity_do_not_overflow_the_stack() {
        // Distinct payloads at the exact same coordinates are legal, distinct
        // points (spec.md §3, §8 "Deletion identity"). Subdividing can never
        // separate them, so past MAX_DEPTH they must pile up in one leaf
        // instead of recursing forever.
        let mut qt = Quadtree::new(Boundary::new([0.0, 0.0], [16.0, 16.0]).unwrap(), 2).unwrap();
        for i in 0..200 {
            assert!(qt.insert(pt([1.0, 1.0], &i.to_string())));
        }
        assert_eq!(qt.len(), 200);
        let hits = qt.range_search(&[1.0, 1.0], 0.0).unwrap();
        assert_eq!(hits.len(), 200);
        assert!(qt.delete(&[1.0, 1.0], &Payload::Str("0".to_string())));
        assert_eq!(qt.len(), 199);
    }

    #[test]
    fn delete_removes_single_match() {
        let mut qt = Quadtree::new(Boundary::new([0.0, 0.0], [16.0, 16.0]).unwrap(), 4).unwrap();
        qt.insert(pt([1.0, 1.0], "dup"));
        qt.insert(pt([1.0, 1.0], "dup"));
        assert!(qt.delete(&[1.0, 1.0], &Payload::Str("dup".to_string())));
        assert_eq!(qt.len(), 1);
        assert!(!qt.delete(&[1.0, 1.0], &Payload::Str("missing".to_string())));
    }

    #[test]
    fn save_load_round_trip() {
        let mut qt = Quadtree::new(Boundary::new([0.0, 0.0], [16.0, 16.0]).unwrap(), 1).unwrap();
        for (i, coord) in [[1.0, 1.0], [2.0, 2.0], [14.0, 14.0], [8.0, 8.0]]
            .into_iter()
            .enumerate()
        {
            qt.insert(pt(coord, &i.to_string()));
        }
        let mut buf = Vec::new();
        qt.save(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let loaded = Quadtree::load(&mut cursor).unwrap();
        assert_eq!(loaded.len(), qt.len());
        let q = [0.0, 0.0];
        assert_eq!(
            qt.knn_search(&q, 2).unwrap(),
            loaded.knn_search(&q, 2).unwrap()
        );
    }

    #[test]
    fn octree_basic() {
        let mut ot = Octree::new(
            Boundary::new([0.0, 0.0, 0.0], [8.0, 8.0, 8.0]).unwrap(),
            1,
        )
        .unwrap();
        for coord in [[0.5, 0.5, 0.5], [7.5, 7.5, 7.5], [0.5, 7.5, 0.5]] {
            ot.insert(Point::new(coord, Payload::Null));
        }
        assert_eq!(ot.len(), 3);
        let hits = ot.range_search(&[0.0, 0.0, 0.0], 2.0).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
