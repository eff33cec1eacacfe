//! The classic Guttman R-tree (spec.md §4.4): quadratic-cost split,
//! least-enlargement choose-subtree.

use std::io::{Read, Write};

use crate::codec;
use crate::error::{Result, SpartError};
use crate::geometry::Point;
use crate::payload::Payload;

use super::{
    choose_subtree_enlargement, count_generic, delete_from_root, knn_generic, normalize_root,
    quadratic_split, range_generic, read_node_generic, tight_union, write_node_generic, Node,
};

/// An R-tree over `D`-dimensional points, indexed by bounding-box
/// containment rather than by coordinate splitting.
pub struct RTree<const D: usize> {
    root: Node<D>,
    max_entries: usize,
    min_fill: usize,
    len: usize,
}

/// A 2D R-tree.
pub type RTree2 = RTree<2>;
/// A 3D R-tree.
pub type RTree3 = RTree<3>;

/// Outcome of inserting into a subtree: either it was absorbed without
/// growing the tree's shape, or it overflowed and split into two siblings.
enum Insertion<const D: usize> {
    Absorbed,
    Split(Node<D>),
}

impl<const D: usize> RTree<D> {
    /// Builds an empty tree with node capacity `max_entries` (spec.md §4.4
    /// names this "the fan-out parameter"; the minimum fill factor is
    /// `max(1, ceil(max_entries / 2))`, Guttman's usual choice).
    pub fn new(max_entries: usize) -> Result<Self> {
        if max_entries == 0 {
            return Err(SpartError::InvalidArgument(
                "max_entries must be at least 1".to_string(),
            ));
        }
        let min_fill = (max_entries / 2).max(1);
        Ok(Self {
            root: Node::empty_leaf(),
            max_entries,
            min_fill,
            len: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, p: Point<D>) {
        self.insert_without_counting(p);
        self.len += 1;
    }

    pub fn insert_bulk(&mut self, ps: impl IntoIterator<Item = Point<D>>) {
        for p in ps {
            self.insert(p);
        }
    }

    /// Inserts `p` without touching `len`, for reinserting a point that was
    /// already counted (an orphan bubbled up by delete's condense step).
    fn insert_without_counting(&mut self, p: Point<D>) {
        if let Insertion::Split(sibling) = Self::insert_into(&mut self.root, p, self.max_entries, self.min_fill) {
            let old_root = std::mem::replace(&mut self.root, Node::empty_leaf());
            let bbox = old_root.bbox().union(&sibling.bbox());
            self.root = Node::Internal {
                bbox,
                children: vec![old_root, sibling],
            };
        }
    }

    fn insert_into(node: &mut Node<D>, p: Point<D>, max_entries: usize, min_fill: usize) -> Insertion<D> {
        match node {
            Node::Leaf { bbox, points } => {
                *bbox = bbox.union_point(&p.coords);
                points.push(p);
                if points.len() > max_entries {
                    let (a, b) = quadratic_split::<D, Point<D>>(std::mem::take(points), min_fill);
                    let box_a = tight_union(&a);
                    let box_b = tight_union(&b);
                    *points = a;
                    *bbox = box_a;
                    Insertion::Split(Node::Leaf {
                        bbox: box_b,
                        points: b,
                    })
                } else {
                    Insertion::Absorbed
                }
            }
            Node::Internal { bbox, children } => {
                let idx = choose_subtree_enlargement(children, &p.coords);
                let result = Self::insert_into(&mut children[idx], p, max_entries, min_fill);
                *bbox = tight_union(children);
                if let Insertion::Split(sibling) = result {
                    children.push(sibling);
                    *bbox = tight_union(children);
                }
                if children.len() > max_entries {
                    let (a, b) = quadratic_split::<D, Node<D>>(std::mem::take(children), min_fill);
                    let box_a = tight_union(&a);
                    let box_b = tight_union(&b);
                    *children = a;
                    *bbox = box_a;
                    Insertion::Split(Node::Internal {
                        bbox: box_b,
                        children: b,
                    })
                } else {
                    Insertion::Absorbed
                }
            }
        }
    }

    /// Removes the point matching `coords`/`data` exactly, reinserting any
    /// orphaned entries from an underflowing subtree (spec.md §4.4
    /// "condense tree").
    pub fn delete(&mut self, coords: &[f64; D], data: &Payload) -> bool {
        let (found, orphans) = delete_from_root(&mut self.root, coords, data, self.min_fill);
        if !found {
            return false;
        }
        normalize_root(&mut self.root);
        self.len -= 1;
        for p in orphans {
            self.insert_without_counting(p);
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

    /// Persists this tree as described by spec.md §6: magic, version, a
    /// `u32` capacity header, then the pre-order node body.
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
        let min_fill = (max_entries / 2).max(1);
        let root = read_node_generic(r)?;
        let len = count_generic(&root);
        Ok(Self {
            root,
            max_entries,
            min_fill,
            len,
        })
    }

    fn magic() -> [u8; 4] {
        if D == 2 {
            *b"RTR2"
        } else {
            *b"RTR3"
        }
    }
}
