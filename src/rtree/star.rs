//! The R*-tree (spec.md §4.5): overlap-aware choose-subtree, the
//! margin/overlap split, and forced reinsertion as the primary overflow
//! treatment.

use std::io::{Read, Write};

use crate::codec;
use crate::error::{Result, SpartError};
use crate::geometry::{distance, Point};
use crate::payload::Payload;

use super::{
    choose_subtree_enlargement, choose_subtree_overlap, count_generic, delete_from_root,
    knn_generic, normalize_root, range_generic, read_node_generic, rstar_split, tight_union,
    write_node_generic, Node,
};

/// An R*-tree over `D`-dimensional points.
pub struct RStarTree<const D: usize> {
    root: Node<D>,
    max_entries: usize,
    min_fill: usize,
    len: usize,
    /// Whether forced reinsertion has already fired during the
    /// currently-in-progress top-level `insert` call.
    in_progress_reinserted: bool,
    /// Number of times forced reinsertion actually fired during the
    /// currently-in-progress (or most recently completed) top-level
    /// `insert`/`delete` call. A test-only probe for spec.md §8 scenario 6
    /// ("verify... that reinsertion was triggered exactly once at the leaf
    /// level"); `in_progress_reinserted` already guarantees this never
    /// exceeds 1, so the counter exists purely to make that guarantee
    /// observable from outside the module.
    reinsertions_this_call: usize,
}

/// A 2D R*-tree.
pub type RStarTree2 = RStarTree<2>;
/// A 3D R*-tree.
pub type RStarTree3 = RStarTree<3>;

enum Insertion<const D: usize> {
    Absorbed,
    Split(Node<D>),
}

impl<const D: usize> RStarTree<D> {
    /// Builds an empty tree with node capacity `max_entries`; the minimum
    /// fill factor is `max(1, ceil(0.4 * max_entries))`, the value the
    /// R*-tree paper recommends (spec.md §4.5).
    pub fn new(max_entries: usize) -> Result<Self> {
        if max_entries == 0 {
            return Err(SpartError::InvalidArgument(
                "max_entries must be at least 1".to_string(),
            ));
        }
        let min_fill = ((max_entries as f64 * 0.4).ceil() as usize).max(1);
        Ok(Self {
            root: Node::empty_leaf(),
            max_entries,
            min_fill,
            len: 0,
            in_progress_reinserted: false,
            reinsertions_this_call: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, p: Point<D>) {
        self.in_progress_reinserted = false;
        self.reinsertions_this_call = 0;
        self.insert_one(p, true);
    }

    pub fn insert_bulk(&mut self, ps: impl IntoIterator<Item = Point<D>>) {
        for p in ps {
            self.insert(p);
        }
    }

    /// Inserts `p`, counting it in `len` only if `count` is set. Points
    /// forced out of a leaf by reinsertion are already counted from their
    /// original insertion, so their requeue through this function must not
    /// count again. The per-top-level-insert reinsertion flag
    /// (spec.md §4.5: reinsertion fires at most once per level per
    /// top-level insert) is threaded through every recursive call this
    /// produces, whether or not it counts.
    fn insert_one(&mut self, p: Point<D>, count: bool) {
        let mut reinserted = self.in_progress_reinserted;
        let mut calls = 0usize;
        let (result, orphans) = Self::insert_into(
            &mut self.root,
            p,
            self.max_entries,
            self.min_fill,
            &mut reinserted,
            &mut calls,
        );
        self.in_progress_reinserted = reinserted;
        self.reinsertions_this_call += calls;
        if let Insertion::Split(sibling) = result {
            let old_root = std::mem::replace(&mut self.root, Node::empty_leaf());
            let bbox = old_root.bbox().union(&sibling.bbox());
            self.root = Node::Internal {
                bbox,
                children: vec![old_root, sibling],
            };
        }
        if count {
            self.len += 1;
        }
        for orphan in orphans {
            self.insert_one(orphan, false);
        }
    }

    fn insert_into(
        node: &mut Node<D>,
        p: Point<D>,
        max_entries: usize,
        min_fill: usize,
        reinserted: &mut bool,
        reinsertion_calls: &mut usize,
    ) -> (Insertion<D>, Vec<Point<D>>) {
        match node {
            Node::Leaf { bbox, points } => {
                *bbox = bbox.union_point(&p.coords);
                points.push(p);
                if points.len() > max_entries {
                    if !*reinserted {
                        *reinserted = true;
                        *reinsertion_calls += 1;
                        let center = bbox.center();
                        let p_count = ((max_entries as f64 * 0.3).ceil() as usize)
                            .max(1)
                            .min(points.len() - 1);
                        points.sort_by(|a, b| {
                            distance(&b.coords, &center)
                                .partial_cmp(&distance(&a.coords, &center))
                                .unwrap()
                        });
                        let removed: Vec<Point<D>> = points.drain(0..p_count).collect();
                        *bbox = tight_union(points);
                        (Insertion::Absorbed, removed)
                    } else {
                        let (a, b) = rstar_split(std::mem::take(points), min_fill);
                        let box_a = tight_union(&a);
                        let box_b = tight_union(&b);
                        *points = a;
                        *bbox = box_a;
                        (
                            Insertion::Split(Node::Leaf {
                                bbox: box_b,
                                points: b,
                            }),
                            vec![],
                        )
                    }
                } else {
                    (Insertion::Absorbed, vec![])
                }
            }
            Node::Internal { bbox, children } => {
                let idx = if children[0].is_leaf() {
                    choose_subtree_overlap(children, &p.coords)
                } else {
                    choose_subtree_enlargement(children, &p.coords)
                };
                let (result, orphans) = Self::insert_into(
                    &mut children[idx],
                    p,
                    max_entries,
                    min_fill,
                    reinserted,
                    reinsertion_calls,
                );
                *bbox = tight_union(children);
                if let Insertion::Split(sibling) = result {
                    children.push(sibling);
                    *bbox = tight_union(children);
                }
                if children.len() > max_entries {
                    let (a, b) = rstar_split(std::mem::take(children), min_fill);
                    let box_a = tight_union(&a);
                    let box_b = tight_union(&b);
                    *children = a;
                    *bbox = box_a;
                    (
                        Insertion::Split(Node::Internal {
                            bbox: box_b,
                            children: b,
                        }),
                        orphans,
                    )
                } else {
                    (Insertion::Absorbed, orphans)
                }
            }
        }
    }

    pub fn delete(&mut self, coords: &[f64; D], data: &Payload) -> bool {
        let (found, orphans) = delete_from_root(&mut self.root, coords, data, self.min_fill);
        if !found {
            return false;
        }
        normalize_root(&mut self.root);
        self.len -= 1;
        self.in_progress_reinserted = false;
        self.reinsertions_this_call = 0;
        for p in orphans {
            self.insert_one(p, false);
        }
        true
    }

    pub fn knn_search(&self, q: &[f64; D], k: usize) -> Result<Vec<Point<D>>> {
        Ok(knn_generic(&self.root, q, k))
    }

    pub fn range_search(&self, q: &[f64; D], r: f64) -> Result<Vec<Point<D>>> {
        if r < 0.0 {
            return Err(SpartError::InvalidArgument(
                "radius must be non-negative".to_string(),
            ));
        }
        let mut out = Vec::new();
        range_generic(&self.root, q, r, &mut out);
        Ok(out)
    }

    pub fn save(&self, w: &mut impl Write) -> Result<()> {
        codec::write_magic(w, &Self::magic())?;
        codec::write_u16(w, codec::CURRENT_VERSION)?;
        codec::write_u32(w, self.max_entries as u32)?;
        write_node_generic(w, &self.root)?;
        Ok(())
    }

    pub fn load(r: &mut impl Read) -> Result<Self> {
        codec::read_and_check_header(r, &Self::magic())?;
        let max_entries = codec::read_u32(r)? as usize;
        let min_fill = ((max_entries as f64 * 0.4).ceil() as usize).max(1);
        let root = read_node_generic(r)?;
        let len = count_generic(&root);
        Ok(Self {
            root,
            max_entries,
            min_fill,
            len,
            in_progress_reinserted: false,
            reinsertions_this_call: 0,
        })
    }

    fn magic() -> [u8; 4] {
        if D == 2 {
            *b"RST2"
        } else {
            *b"RST3"
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
    fn rejects_zero_capacity() {
        assert!(RStarTree2::new(0).is_err());
        assert!(RStarTree2::new(1).is_ok());
    }

    #[test]
    fn insert_many_preserves_all_points() {
        let mut t = RStarTree2::new(4).unwrap();
        let pts: Vec<_> = (0..40).map(|i| pt([i as f64, (i * 5 % 23) as f64], &i.to_string())).collect();
        for p in pts.clone() {
            t.insert(p);
        }
        assert_eq!(t.len(), 40);
        for p in &pts {
            let hits = t.range_search(&p.coords, 0.0).unwrap();
            assert!(hits.iter().any(|h| h.data == p.data));
        }
    }

    #[test]
    fn reinsertion_fires_once_on_first_leaf_overflow() {
        // spec.md §8 scenario 6: with max_entries = 4, the 5th point into a
        // single leaf overflows it. Forced reinsertion fires first (removing
        // the ceil(0.3*4)=2 farthest entries and requeuing them through the
        // top-level insert path); those requeues land back on the only
        // existing leaf and overflow it again, but by then
        // `in_progress_reinserted` is already set, so the *second* overflow
        // within this same top-level insert splits instead of reinserting
        // again — reinsertion fires exactly once, and the root legitimately
        // ends up as an internal node with two leaves. What must hold is
        // that reinsertion was triggered exactly once and every point
        // (including the two forced out and requeued) survives.
        let mut t = RStarTree2::new(4).unwrap();
        for i in 0..4 {
            t.insert(pt([i as f64, 0.0], &i.to_string()));
        }
        assert_eq!(t.reinsertions_this_call, 0);

        t.insert(pt([4.0, 0.0], "4"));

        assert_eq!(t.len(), 5);
        assert!(
            t.in_progress_reinserted,
            "forced reinsertion must fire on the overflow-causing insert"
        );
        assert_eq!(
            t.reinsertions_this_call, 1,
            "forced reinsertion must fire exactly once per top-level insert"
        );
        for i in 0..5 {
            let hits = t.range_search(&[i as f64, 0.0], 0.0).unwrap();
            assert!(
                hits.iter().any(|h| h.data == Payload::Str(i.to_string())),
                "point {i} must survive the reinsertion-then-split sequence"
            );
        }
    }

    #[test]
    fn knn_basic() {
        let mut t = RStarTree2::new(4).unwrap();
        t.insert(pt([0.0, 0.0], "origin"));
        t.insert(pt([10.0, 10.0], "far"));
        t.insert(pt([1.0, 1.0], "near"));
        let res = t.knn_search(&[0.0, 0.0], 2).unwrap();
        assert_eq!(res.len(), 2);
        assert_eq!(res[0].data, Payload::Str("origin".to_string()));
        assert_eq!(res[1].data, Payload::Str("near".to_string()));
    }

    #[test]
    fn delete_removes_and_preserves_others() {
        let mut t = RStarTree2::new(4).unwrap();
        let pts: Vec<_> = (0..30).map(|i| pt([i as f64, 0.0], &i.to_string())).collect();
        for p in pts.clone() {
            t.insert(p);
        }
        assert!(t.delete(&[15.0, 0.0], &Payload::Str("15".to_string())));
        assert_eq!(t.len(), 29);
        assert!(!t.delete(&[15.0, 0.0], &Payload::Str("15".to_string())));
    }

    fn boxes_close(a: crate::geometry::BBox<2>, b: crate::geometry::BBox<2>) -> bool {
        a.min.iter().zip(b.min.iter()).all(|(x, y)| (x - y).abs() < 1e-9)
            && a.max.iter().zip(b.max.iter()).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    fn check_invariants(node: &Node<2>, is_root: bool, min_fill: usize, max_entries: usize) -> bool {
        match node {
            Node::Leaf { points, .. } => is_root || (points.len() >= min_fill && points.len() <= max_entries),
            Node::Internal { bbox, children } => {
                let count_ok = is_root || (children.len() >= min_fill && children.len() <= max_entries);
                let tight = boxes_close(*bbox, tight_union(children));
                count_ok && tight && children.iter().all(|c| check_invariants(c, false, min_fill, max_entries))
            }
        }
    }

    #[test]
    fn node_invariants_hold_after_many_inserts_and_deletes() {
        let mut t = RStarTree2::new(4).unwrap();
        let pts: Vec<_> = (0..60).map(|i| pt([(i * 13 % 97) as f64, (i * 29 % 83) as f64], &i.to_string())).collect();
        for p in pts.clone() {
            t.insert(p);
        }
        assert!(check_invariants(&t.root, true, t.min_fill, t.max_entries));
        for i in (0..60).step_by(3) {
            t.delete(&pts[i].coords, &pts[i].data);
        }
        assert!(check_invariants(&t.root, true, t.min_fill, t.max_entries));
    }

    #[test]
    fn save_load_round_trip() {
        let mut t = RStarTree2::new(4).unwrap();
        for i in 0..25 {
            t.insert(pt([i as f64, (i * 3 % 11) as f64], &i.to_string()));
        }
        let mut buf = Vec::new();
        t.save(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let loaded = RStarTree2::load(&mut cursor).unwrap();
        assert_eq!(loaded.len(), t.len());
        let q = [5.0, 5.0];
        assert_eq!(t.knn_search(&q, 5).unwrap(), loaded.knn_search(&q, 5).unwrap());
    }
}
