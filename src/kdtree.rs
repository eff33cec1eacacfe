//! K-d tree: a binary space-partitioning tree alternating splitting
//! dimensions by depth (spec.md §4.3).

use std::collections::BinaryHeap;
use std::io::{Read, Write};

use ordered_float::OrderedFloat;

use crate::codec;
use crate::error::{Result, SpartError};
use crate::geometry::{distance, squared_distance, Point};
use crate::payload::Payload;

struct Node<const D: usize> {
    point: Point<D>,
    left: Option<Box<Node<D>>>,
    right: Option<Box<Node<D>>>,
}

impl<const D: usize> Node<D> {
    fn new(point: Point<D>) -> Self {
        Self {
            point,
            left: None,
            right: None,
        }
    }

    fn insert(&mut self, p: Point<D>, depth: usize) {
        let axis = depth % D;
        if p.coords[axis] < self.point.coords[axis] {
            match &mut self.left {
                Some(child) => child.insert(p, depth + 1),
                None => self.left = Some(Box::new(Node::new(p))),
            }
        } else {
            match &mut self.right {
                Some(child) => child.insert(p, depth + 1),
                None => self.right = Some(Box::new(Node::new(p))),
            }
        }
    }

    /// Finds the minimum-on-`axis` node in this subtree (used by
    /// deletion's canonical successor rule, spec.md §4.3).
    fn find_min(node: &Node<D>, axis: usize, depth: usize) -> &Node<D> {
        let my_axis = depth % D;
        if my_axis == axis {
            match &node.left {
                Some(left) => Self::find_min(left, axis, depth + 1),
                None => node,
            }
        } else {
            let mut best = node;
            for child in [&node.left, &node.right].into_iter().flatten() {
                let candidate = Self::find_min(child, axis, depth + 1);
                if candidate.point.coords[axis] < best.point.coords[axis] {
                    best = candidate;
                }
            }
            best
        }
    }

    /// Deletes the node matching `coords`/`data` from this subtree, if
    /// present, returning the (possibly replaced) subtree root.
    fn delete(
        mut boxed: Box<Node<D>>,
        coords: &[f64; D],
        data: &Payload,
        depth: usize,
        found: &mut bool,
    ) -> Option<Box<Node<D>>> {
        let axis = depth % D;
        if &boxed.point.coords == coords && &boxed.point.data == data {
            *found = true;
            if let Some(right) = boxed.right.take() {
                let successor = Self::find_min(&right, axis, depth + 1);
                let successor_point = successor.point.clone();
                boxed.right = Self::delete(right, &successor_point.coords.clone(), &successor_point.data.clone(), depth + 1, &mut false);
                boxed.point = successor_point;
                return Some(boxed);
            }
            if let Some(left) = boxed.left.take() {
                // Move the left subtree to the right, per spec.md §4.3.
                let successor = Self::find_min(&left, axis, depth + 1);
                let successor_point = successor.point.clone();
                boxed.right = Self::delete(left, &successor_point.coords.clone(), &successor_point.data.clone(), depth + 1, &mut false);
                boxed.left = None;
                boxed.point = successor_point;
                return Some(boxed);
            }
            // Leaf: drop it.
            return None;
        }
        if coords[axis] < boxed.point.coords[axis] {
            if let Some(left) = boxed.left.take() {
                boxed.left = Self::delete(left, coords, data, depth + 1, found);
            }
        } else {
            if let Some(right) = boxed.right.take() {
                boxed.right = Self::delete(right, coords, data, depth + 1, found);
            }
        }
        Some(boxed)
    }
}

/// A k-d tree over `D`-dimensional points.
pub struct KdTree<const D: usize> {
    root: Option<Box<Node<D>>>,
    len: usize,
}

/// A 2D k-d tree.
pub type KdTree2 = KdTree<2>;
/// A 3D k-d tree.
pub type KdTree3 = KdTree<3>;

impl<const D: usize> Default for KdTree<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const D: usize> KdTree<D> {
    pub fn new() -> Self {
        Self { root: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Standard binary descent insert; ties on the split axis go right
    /// (spec.md §4.3).
    pub fn insert(&mut self, p: Point<D>) {
        match &mut self.root {
            Some(root) => root.insert(p, 0),
            None => self.root = Some(Box::new(Node::new(p))),
        }
        self.len += 1;
    }

    /// Rebuilds a balanced tree from `ps` by repeated median-of-all split
    /// (spec.md §4.3). If the tree is non-empty, the new points are merged
    /// with the existing population and the whole tree is rebuilt — the
    /// "rebuild" resolution of spec.md §9's open question (b).
    pub fn insert_bulk(&mut self, ps: impl IntoIterator<Item = Point<D>>) {
        let mut all: Vec<Point<D>> = self.drain_points();
        all.extend(ps);
        self.root = Self::build(all, 0);
    }

    fn drain_points(&mut self) -> Vec<Point<D>> {
        let mut out = Vec::with_capacity(self.len);
        fn walk<const D: usize>(node: Option<Box<Node<D>>>, out: &mut Vec<Point<D>>) {
            if let Some(n) = node {
                out.push(n.point);
                walk(n.left, out);
                walk(n.right, out);
            }
        }
        walk(self.root.take(), &mut out);
        self.len = 0;
        out
    }

    fn build(mut points: Vec<Point<D>>, depth: usize) -> Option<Box<Node<D>>> {
        if points.is_empty() {
            return None;
        }
        let axis = depth % D;
        // A full sort is the reference implementation spec.md §4.3 allows
        // in place of a linear-time selection.
        points.sort_by(|a, b| a.coords[axis].partial_cmp(&b.coords[axis]).unwrap());
        let mid = points.len() / 2;
        let median = points[mid].clone();
        let right_points = points.split_off(mid + 1);
        points.pop(); // remove the median itself from the left half
        let left = Self::build(points, depth + 1);
        let right = Self::build(right_points, depth + 1);
        Some(Box::new(Node {
            point: median,
            left,
            right,
        }))
    }

    /// Deletes a node equal (coordinates and payload) to the description,
    /// using the canonical minimum-successor algorithm (spec.md §4.3).
    pub fn delete(&mut self, coords: &[f64; D], data: &Payload) -> bool {
        let Some(root) = self.root.take() else {
            return false;
        };
        let mut found = false;
        self.root = Node::delete(root, coords, data, 0, &mut found);
        if found {
            self.len -= 1;
        }
        found
    }

    /// Recursive kNN descent with a bounded max-heap of size `k`
    /// (spec.md §4.3).
    pub fn knn_search(&self, q: &[f64; D], k: usize) -> Result<Vec<Point<D>>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut best: BinaryHeap<(OrderedFloat<f64>, usize, Point<D>)> = BinaryHeap::new();
        let mut seq = 0usize;
        if let Some(root) = &self.root {
            Self::knn_node(root, q, k, 0, &mut best, &mut seq);
        }
        let mut ordered: Vec<_> = best.into_vec();
        ordered.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        Ok(ordered.into_iter().map(|(_, _, p)| p).collect())
    }

    fn knn_node(
        node: &Node<D>,
        q: &[f64; D],
        k: usize,
        depth: usize,
        best: &mut BinaryHeap<(OrderedFloat<f64>, usize, Point<D>)>,
        seq: &mut usize,
    ) {
        let d2 = squared_distance(&node.point.coords, q);
        let d = d2.sqrt();
        if best.len() < k {
            best.push((OrderedFloat(d), *seq, node.point.clone()));
            *seq += 1;
        } else if let Some((worst, _, _)) = best.peek() {
            if d < worst.0 {
                best.pop();
                best.push((OrderedFloat(d), *seq, node.point.clone()));
                *seq += 1;
            }
        }

        let axis = depth % D;
        let go_left_first = q[axis] < node.point.coords[axis];
        let (near, far) = if go_left_first {
            (&node.left, &node.right)
        } else {
            (&node.right, &node.left)
        };
        if let Some(near) = near {
            Self::knn_node(near, q, k, depth + 1, best, seq);
        }
        let plane_dist = (q[axis] - node.point.coords[axis]).abs();
        let within = if best.len() < k {
            true
        } else {
            best.peek().map(|(w, _, _)| plane_dist < w.0).unwrap_or(true)
        };
        if within {
            if let Some(far) = far {
                Self::knn_node(far, q, k, depth + 1, best, seq);
            }
        }
    }

    /// Recursive range search, descending only into half-spaces within `r`
    /// of `q` on the split axis (spec.md §4.3). `r < 0` is an
    /// `InvalidArgument`.
    pub fn range_search(&self, q: &[f64; D], r: f64) -> Result<Vec<Point<D>>> {
        if r < 0.0 {
            return Err(SpartError::InvalidArgument(
                "radius must be non-negative".to_string(),
            ));
        }
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            Self::range_node(root, q, r, 0, &mut out);
        }
        Ok(out)
    }

    fn range_node(node: &Node<D>, q: &[f64; D], r: f64, depth: usize, out: &mut Vec<Point<D>>) {
        if distance(&node.point.coords, q) <= r {
            out.push(node.point.clone());
        }
        let axis = depth % D;
        let delta = q[axis] - node.point.coords[axis];
        if delta <= r {
            if let Some(left) = &node.left {
                Self::range_node(left, q, r, depth + 1, out);
            }
        }
        if -delta <= r {
            if let Some(right) = &node.right {
                Self::range_node(right, q, r, depth + 1, out);
            }
        }
    }

    /// Persists this tree in the format described by spec.md §6. Node
    /// encoding: an absence byte (`0`), or presence (`1`) followed by the
    /// point entry and, recursively, the left then right subtrees.
    pub fn save(&self, w: &mut impl Write) -> Result<()> {
        codec::write_magic(w, &Self::magic())?;
        codec::write_u16(w, codec::CURRENT_VERSION)?;
        Self::write_node(w, &self.root)?;
        Ok(())
    }

    fn write_node(w: &mut impl Write, node: &Option<Box<Node<D>>>) -> Result<()> {
        match node {
            None => {
                w.write_all(&[0u8])?;
            }
            Some(n) => {
                w.write_all(&[1u8])?;
                codec::write_point(w, &n.point)?;
                Self::write_node(w, &n.left)?;
                Self::write_node(w, &n.right)?;
            }
        }
        Ok(())
    }

    /// Reconstructs a tree previously written by [`Self::save`].
    pub fn load(r: &mut impl Read) -> Result<Self> {
        codec::read_and_check_header(r, &Self::magic())?;
        let root = Self::read_node(r)?;
        let len = Self::count(&root);
        Ok(Self { root, len })
    }

    fn read_node(r: &mut impl Read) -> Result<Option<Box<Node<D>>>> {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)?;
        match tag[0] {
            0 => Ok(None),
            1 => {
                let point = codec::read_point(r)?;
                let left = Self::read_node(r)?;
                let right = Self::read_node(r)?;
                Ok(Some(Box::new(Node { point, left, right })))
            }
            other => Err(SpartError::Format(format!("unknown node presence tag {other}"))),
        }
    }

    fn count(node: &Option<Box<Node<D>>>) -> usize {
        match node {
            None => 0,
            Some(n) => 1 + Self::count(&n.left) + Self::count(&n.right),
        }
    }

    fn magic() -> [u8; 4] {
        if D == 2 {
            *b"KDT2"
        } else {
            *b"KDT3"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(coords: [f64; 2], label: &str) -> Point<2> {
        Point::new(coords, Payload::Str(label.to_string()))
    }

    #[test]
    fn delete_and_requery() {
        let mut kd = KdTree2::new();
        kd.insert(pt([1.0, 2.0], "p1"));
        kd.insert(pt([5.0, 5.0], "p2"));
        kd.insert(pt([9.0, 8.0], "p3"));
        assert!(kd.delete(&[5.0, 5.0], &Payload::Str("p2".to_string())));
        assert_eq!(kd.len(), 2);
        let res = kd.knn_search(&[5.0, 5.0], 1).unwrap();
        assert_eq!(res.len(), 1);
    }

    #[test]
    fn range_boundary_inclusive() {
        let mut kd = KdTree2::new();
        kd.insert(pt([0.0, 0.0], "a"));
        kd.insert(pt([10.0, 0.0], "b"));
        kd.insert(pt([10.1, 0.0], "c"));
        let hits = kd.range_search(&[0.0, 0.0], 10.0).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|p| p.data != Payload::Str("c".to_string())));
    }

    #[test]
    fn bulk_insert_equivalent_to_sequential() {
        let points: Vec<_> = (0..50)
            .map(|i| pt([i as f64, (i * 3 % 17) as f64], &i.to_string()))
            .collect();

        let mut bulk = KdTree2::new();
        bulk.insert_bulk(points.clone());

        let mut seq = KdTree2::new();
        for p in points.clone() {
            seq.insert(p);
        }

        assert_eq!(bulk.len(), seq.len());
        let q = [10.0, 5.0];
        let bulk_res = bulk.knn_search(&q, 5).unwrap();
        let seq_res = seq.knn_search(&q, 5).unwrap();
        let bulk_dists: Vec<f64> = bulk_res.iter().map(|p| distance(&p.coords, &q)).collect();
        let seq_dists: Vec<f64> = seq_res.iter().map(|p| distance(&p.coords, &q)).collect();
        assert_eq!(bulk_dists, seq_dists);
    }

    #[test]
    fn save_load_round_trip() {
        let mut kd = KdTree2::new();
        for i in 0..10 {
            kd.insert(pt([i as f64, (10 - i) as f64], &i.to_string()));
        }
        let mut buf = Vec::new();
        kd.save(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let loaded = KdTree2::load(&mut cursor).unwrap();
        assert_eq!(loaded.len(), kd.len());
        let q = [3.0, 3.0];
        assert_eq!(kd.knn_search(&q, 4).unwrap(), loaded.knn_search(&q, 4).unwrap());
    }
}
