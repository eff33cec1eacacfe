//! Shared node shape, geometry helpers, search, delete-condense, and codec
//! framing for the R-tree and R*-tree families (spec.md §4.4, §4.5).
//!
//! Per spec.md §9 ("there is no requirement that implementations share code
//! beyond geometry primitives and the binary codec framing"), [`classic`]
//! and [`star`] each own their `insert`/split/choose-subtree logic; this
//! module carries everything that genuinely is identical in shape between
//! the two families: the node type, search traversals, and the
//! condense-on-underflow skeleton of delete.

pub mod classic;
pub mod star;

use std::collections::BinaryHeap;
use std::io::{Read, Write};

use ordered_float::OrderedFloat;

use crate::codec;
use crate::error::Result;
use crate::geometry::BBox;
use crate::geometry::Point;
use crate::payload::Payload;

pub use classic::{RTree2, RTree3};
pub use star::{RStarTree2, RStarTree3};

/// Anything with a bounding box: points (degenerate boxes) and subtrees.
pub(crate) trait Spatial<const D: usize> {
    fn bbox(&self) -> BBox<D>;
}

impl<const D: usize> Spatial<D> for Point<D> {
    fn bbox(&self) -> BBox<D> {
        BBox::from_point(&self.coords)
    }
}

impl<const D: usize> Spatial<D> for Node<D> {
    fn bbox(&self) -> BBox<D> {
        self.bbox()
    }
}

/// A node of an R-tree/R*-tree: a leaf of points, or an internal node of
/// child subtrees, each tagged with the tight union box of its contents
/// (spec.md §4.4 "every internal entry's bounding box is the tight union of
/// its children's boxes").
pub(crate) enum Node<const D: usize> {
    Leaf { bbox: BBox<D>, points: Vec<Point<D>> },
    Internal { bbox: BBox<D>, children: Vec<Node<D>> },
}

impl<const D: usize> Node<D> {
    pub(crate) fn empty_leaf() -> Self {
        Node::Leaf {
            bbox: BBox {
                min: [0.0; D],
                max: [0.0; D],
            },
            points: Vec::new(),
        }
    }

    pub(crate) fn bbox(&self) -> BBox<D> {
        match self {
            Node::Leaf { bbox, .. } => *bbox,
            Node::Internal { bbox, .. } => *bbox,
        }
    }

    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}

/// Picks the child requiring the least bounding-box enlargement to admit
/// `coords`, breaking ties by the child's current (smaller) area. Guttman's
/// ChooseLeaf rule (spec.md §4.4), also used by the R*-tree at
/// non-leaf-parent levels (spec.md §4.5).
pub(crate) fn choose_subtree_enlargement<const D: usize>(children: &[Node<D>], coords: &[f64; D]) -> usize {
    let mut best = 0;
    let mut best_enlargement = f64::INFINITY;
    let mut best_area = f64::INFINITY;
    for (i, child) in children.iter().enumerate() {
        let b = child.bbox();
        let enlargement = b.enlargement_point(coords);
        let area = b.area();
        if enlargement < best_enlargement || (enlargement == best_enlargement && area < best_area) {
            best = i;
            best_enlargement = enlargement;
            best_area = area;
        }
    }
    best
}

pub(crate) fn tight_union<const D: usize, T: Spatial<D>>(items: &[T]) -> BBox<D> {
    let mut iter = items.iter();
    let first = iter
        .next()
        .map(|i| i.bbox())
        .unwrap_or(BBox {
            min: [0.0; D],
            max: [0.0; D],
        });
    iter.fold(first, |acc, item| acc.union(&item.bbox()))
}

/// Picks the two entries maximizing `area(union) - area(e1) - area(e2)`
/// (Guttman's PickSeeds, spec.md §4.4), shared by quadratic and R*-split's
/// fallback degenerate cases.
pub(crate) fn pick_seeds<const D: usize, T: Spatial<D>>(items: &[T]) -> (usize, usize) {
    let mut best = (0, 1, f64::NEG_INFINITY);
    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            let bi = items[i].bbox();
            let bj = items[j].bbox();
            let waste = bi.union(&bj).area() - bi.area() - bj.area();
            if waste > best.2 {
                best = (i, j, waste);
            }
        }
    }
    (best.0, best.1)
}

/// Guttman's quadratic-cost split (spec.md §4.4): seed two groups with
/// [`pick_seeds`], then repeatedly assign the remaining entry with the
/// largest preference for one group over the other to whichever group it
/// prefers, until one group has just enough entries left to satisfy
/// `min_fill` for both sides.
pub(crate) fn quadratic_split<const D: usize, T: Spatial<D>>(
    mut items: Vec<T>,
    min_fill: usize,
) -> (Vec<T>, Vec<T>) {
    let (i, j) = pick_seeds::<D, T>(&items);
    let seed_b = items.remove(j.max(i));
    let seed_a = items.remove(j.min(i));
    let mut group_a = vec![seed_a];
    let mut group_b = vec![seed_b];
    let mut box_a = group_a[0].bbox();
    let mut box_b = group_b[0].bbox();
    let mut remaining = items;

    while !remaining.is_empty() {
        let total_remaining = remaining.len();
        if group_a.len() + total_remaining == min_fill {
            group_a.extend(remaining);
            break;
        }
        if group_b.len() + total_remaining == min_fill {
            group_b.extend(remaining);
            break;
        }
        let mut best_idx = 0;
        let mut best_pref = f64::NEG_INFINITY;
        let mut best_d_a = 0.0;
        let mut best_d_b = 0.0;
        for (idx, item) in remaining.iter().enumerate() {
            let b = item.bbox();
            let d_a = box_a.enlargement(&b);
            let d_b = box_b.enlargement(&b);
            let pref = (d_a - d_b).abs();
            if pref > best_pref {
                best_pref = pref;
                best_idx = idx;
                best_d_a = d_a;
                best_d_b = d_b;
            }
        }
        let item = remaining.remove(best_idx);
        let b = item.bbox();
        let goes_to_a = match best_d_a.partial_cmp(&best_d_b).unwrap() {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => {
                if box_a.area() != box_b.area() {
                    box_a.area() < box_b.area()
                } else {
                    group_a.len() <= group_b.len()
                }
            }
        };
        if goes_to_a {
            box_a = box_a.union(&b);
            group_a.push(item);
        } else {
            box_b = box_b.union(&b);
            group_b.push(item);
        }
    }

    (group_a, group_b)
}

/// Picks the child minimizing the increase in total overlap with its
/// siblings that admitting `coords` would cause, tie-broken by area
/// enlargement then by resulting area (spec.md §4.5's ChooseSubtree, used
/// when `children` are leaves).
pub(crate) fn choose_subtree_overlap<const D: usize>(children: &[Node<D>], coords: &[f64; D]) -> usize {
    let mut best = 0;
    let mut best_overlap_enlargement = f64::INFINITY;
    let mut best_area_enlargement = f64::INFINITY;
    let mut best_area = f64::INFINITY;
    for i in 0..children.len() {
        let bi = children[i].bbox();
        let enlarged = bi.union_point(coords);
        let before: f64 = children
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(_, c)| bi.overlap(&c.bbox()))
            .sum();
        let after: f64 = children
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(_, c)| enlarged.overlap(&c.bbox()))
            .sum();
        let overlap_enlargement = after - before;
        let area_enlargement = enlarged.area() - bi.area();
        let better = overlap_enlargement < best_overlap_enlargement
            || (overlap_enlargement == best_overlap_enlargement
                && (area_enlargement < best_area_enlargement
                    || (area_enlargement == best_area_enlargement && enlarged.area() < best_area)));
        if better {
            best = i;
            best_overlap_enlargement = overlap_enlargement;
            best_area_enlargement = area_enlargement;
            best_area = enlarged.area();
        }
    }
    best
}

fn union_of_indices<const D: usize, T: Spatial<D>>(items: &[T], idxs: &[usize]) -> BBox<D> {
    let mut iter = idxs.iter();
    let first = items[*iter.next().expect("non-empty index set")].bbox();
    iter.fold(first, |acc, &i| acc.union(&items[i].bbox()))
}

/// The R*-tree's split (spec.md §4.5): choose the axis minimizing the
/// summed margin of every valid `m..=n-m` distribution sorted on that axis
/// (S-choose-split-axis), then on that axis choose the distribution
/// minimizing overlap, tie-broken by summed area (S-choose-split-index).
pub(crate) fn rstar_split<const D: usize, T: Spatial<D>>(items: Vec<T>, min_fill: usize) -> (Vec<T>, Vec<T>) {
    let n = items.len();
    let m = min_fill.max(1).min(n / 2).max(1);
    let hi = n - m;

    let mut per_axis_sorted: Vec<Vec<usize>> = Vec::with_capacity(D);
    let mut best_axis = 0;
    let mut best_margin_sum = f64::INFINITY;
    for axis in 0..D {
        let mut idxs: Vec<usize> = (0..n).collect();
        idxs.sort_by(|&i, &j| {
            let bi = items[i].bbox();
            let bj = items[j].bbox();
            bi.min[axis]
                .partial_cmp(&bj.min[axis])
                .unwrap()
                .then(bi.max[axis].partial_cmp(&bj.max[axis]).unwrap())
        });
        let mut margin_sum = 0.0;
        for k in m..=hi {
            let (first, second) = idxs.split_at(k);
            margin_sum += union_of_indices(&items, first).margin() + union_of_indices(&items, second).margin();
        }
        if margin_sum < best_margin_sum {
            best_margin_sum = margin_sum;
            best_axis = axis;
        }
        per_axis_sorted.push(idxs);
    }

    let idxs = &per_axis_sorted[best_axis];
    let mut best_k = m;
    let mut best_overlap = f64::INFINITY;
    let mut best_area_sum = f64::INFINITY;
    for k in m..=hi {
        let (first, second) = idxs.split_at(k);
        let box1 = union_of_indices(&items, first);
        let box2 = union_of_indices(&items, second);
        let overlap = box1.overlap(&box2);
        let area_sum = box1.area() + box2.area();
        if overlap < best_overlap || (overlap == best_overlap && area_sum < best_area_sum) {
            best_overlap = overlap;
            best_area_sum = area_sum;
            best_k = k;
        }
    }

    let (first_idx, second_idx) = idxs.split_at(best_k);
    let first_set = first_idx.to_vec();
    let second_set = second_idx.to_vec();
    let mut items_opt: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let group_a = first_set.iter().map(|&i| items_opt[i].take().unwrap()).collect();
    let group_b = second_set.iter().map(|&i| items_opt[i].take().unwrap()).collect();
    (group_a, group_b)
}

fn collect_points<const D: usize>(node: Node<D>, out: &mut Vec<Point<D>>) {
    match node {
        Node::Leaf { points, .. } => out.extend(points),
        Node::Internal { children, .. } => {
            for child in children {
                collect_points(child, out);
            }
        }
    }
}

/// Outcome of deleting from a non-root subtree (spec.md §4.4 delete /
/// "condense").
pub(crate) enum DeleteResult<const D: usize> {
    NotFound,
    Done,
    /// The target was removed and this node survives, but orphaned points
    /// bubbled up from a dissolved descendant must be reinserted at the
    /// top level.
    Reinsert(Vec<Point<D>>),
    /// This node itself fell below `min_fill` and has been dissolved; its
    /// remaining contents (flattened to points) must be reinserted.
    Dissolved(Vec<Point<D>>),
}

/// Deletes `coords`/`data` from a non-root subtree, applying the
/// min-fill dissolve rule to `node` itself (valid only for non-root
/// nodes, spec.md §3 "root may have fewer, down to 1").
pub(crate) fn delete_rec<const D: usize>(
    node: &mut Node<D>,
    coords: &[f64; D],
    data: &Payload,
    min_fill: usize,
) -> DeleteResult<D> {
    match node {
        Node::Leaf { bbox, points } => {
            match points
                .iter()
                .position(|p| &p.coords == coords && &p.data == data)
            {
                None => DeleteResult::NotFound,
                Some(idx) => {
                    points.remove(idx);
                    if points.len() < min_fill {
                        DeleteResult::Dissolved(std::mem::take(points))
                    } else {
                        *bbox = tight_union(points);
                        DeleteResult::Done
                    }
                }
            }
        }
        Node::Internal { bbox, children } => {
            for i in 0..children.len() {
                match delete_rec(&mut children[i], coords, data, min_fill) {
                    DeleteResult::NotFound => continue,
                    DeleteResult::Done => {
                        *bbox = tight_union(children);
                        return DeleteResult::Done;
                    }
                    DeleteResult::Reinsert(points) => {
                        *bbox = tight_union(children);
                        return DeleteResult::Reinsert(points);
                    }
                    DeleteResult::Dissolved(points) => {
                        children.remove(i);
                        return if children.len() < min_fill {
                            let mut all = points;
                            for c in children.drain(..) {
                                collect_points(c, &mut all);
                            }
                            DeleteResult::Dissolved(all)
                        } else {
                            *bbox = tight_union(children);
                            DeleteResult::Reinsert(points)
                        };
                    }
                }
            }
            DeleteResult::NotFound
        }
    }
}

/// Deletes from the root, which is exempt from the min-fill rule: a child
/// subtree can still dissolve and bubble orphans up, but the root itself
/// never dissolves, only shrinks.
pub(crate) fn delete_from_root<const D: usize>(
    root: &mut Node<D>,
    coords: &[f64; D],
    data: &Payload,
    min_fill: usize,
) -> (bool, Vec<Point<D>>) {
    match root {
        Node::Leaf { bbox, points } => {
            match points
                .iter()
                .position(|p| &p.coords == coords && &p.data == data)
            {
                None => (false, vec![]),
                Some(idx) => {
                    points.remove(idx);
                    *bbox = tight_union(points);
                    (true, vec![])
                }
            }
        }
        Node::Internal { bbox, children } => {
            for i in 0..children.len() {
                match delete_rec(&mut children[i], coords, data, min_fill) {
                    DeleteResult::NotFound => continue,
                    DeleteResult::Done => {
                        *bbox = tight_union(children);
                        return (true, vec![]);
                    }
                    DeleteResult::Reinsert(points) => {
                        *bbox = tight_union(children);
                        return (true, points);
                    }
                    DeleteResult::Dissolved(points) => {
                        children.remove(i);
                        *bbox = if children.is_empty() {
                            BBox {
                                min: [0.0; D],
                                max: [0.0; D],
                            }
                        } else {
                            tight_union(children)
                        };
                        return (true, points);
                    }
                }
            }
            (false, vec![])
        }
    }
}

/// Collapses a root with exactly one internal child down to that child
/// (spec.md §4.4), and turns a childless internal root back into an empty
/// leaf.
pub(crate) fn normalize_root<const D: usize>(root: &mut Node<D>) {
    loop {
        match root {
            Node::Internal { children, .. } if children.is_empty() => {
                *root = Node::empty_leaf();
            }
            Node::Internal { children, .. } if children.len() == 1 && !children[0].is_leaf() => {
                let only = std::mem::replace(children, Vec::new()).remove(0);
                *root = only;
            }
            _ => break,
        }
    }
}

/// Best-first kNN search, identical in shape for both families
/// (spec.md §4.4/§4.5): a min-heap of `(entry, min_distance)`.
pub(crate) fn knn_generic<const D: usize>(root: &Node<D>, q: &[f64; D], k: usize) -> Vec<Point<D>> {
    if k == 0 {
        return Vec::new();
    }
    let mut nodes: Vec<&Node<D>> = vec![root];
    let mut frontier: BinaryHeap<std::cmp::Reverse<(OrderedFloat<f64>, usize)>> = BinaryHeap::new();
    frontier.push(std::cmp::Reverse((OrderedFloat(root.bbox().min_distance(q)), 0)));

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
        match nodes[idx] {
            Node::Leaf { points, .. } => {
                for p in points {
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
            Node::Internal { children, .. } => {
                for child in children {
                    let d = child.bbox().min_distance(q);
                    let admit = if best.len() < k {
                        true
                    } else {
                        best.peek().map(|(w, _, _)| d < w.0).unwrap_or(true)
                    };
                    if admit {
                        nodes.push(child);
                        frontier.push(std::cmp::Reverse((OrderedFloat(d), nodes.len() - 1)));
                    }
                }
            }
        }
    }

    let mut ordered: Vec<_> = best.into_vec();
    ordered.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    ordered.into_iter().map(|(_, _, i)| best_points[i].clone()).collect()
}

/// Depth-first range search, descending any subtree whose box intersects
/// the query ball (spec.md §4.4).
pub(crate) fn range_generic<const D: usize>(node: &Node<D>, q: &[f64; D], r: f64, out: &mut Vec<Point<D>>) {
    if !node.bbox().intersects_ball(q, r) {
        return;
    }
    match node {
        Node::Leaf { points, .. } => {
            for p in points {
                if crate::geometry::distance(&p.coords, q) <= r {
                    out.push(p.clone());
                }
            }
        }
        Node::Internal { children, .. } => {
            for child in children {
                range_generic(child, q, r, out);
            }
        }
    }
}

pub(crate) fn count_generic<const D: usize>(node: &Node<D>) -> usize {
    match node {
        Node::Leaf { points, .. } => points.len(),
        Node::Internal { children, .. } => children.iter().map(count_generic).sum(),
    }
}

/// Writes a node in pre-order: tag, count, then point entries (leaf) or
/// recursively encoded children (internal). Boxes are not persisted —
/// they are the tight union of contents and are rebuilt on load.
pub(crate) fn write_node_generic<const D: usize>(w: &mut impl Write, node: &Node<D>) -> Result<()> {
    match node {
        Node::Leaf { points, .. } => {
            w.write_all(&[codec::TAG_LEAF])?;
            codec::write_u32(w, points.len() as u32)?;
            for p in points {
                codec::write_point(w, p)?;
            }
        }
        Node::Internal { children, .. } => {
            w.write_all(&[codec::TAG_INTERNAL])?;
            codec::write_u32(w, children.len() as u32)?;
            for child in children {
                write_node_generic(w, child)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn read_node_generic<const D: usize>(r: &mut impl Read) -> Result<Node<D>> {
    let mut tag = [0u8; 1];
    r.read_exact(&mut tag)?;
    let count = codec::read_u32(r)? as usize;
    match tag[0] {
        codec::TAG_LEAF => {
            let mut points = Vec::with_capacity(count);
            for _ in 0..count {
                points.push(codec::read_point(r)?);
            }
            let bbox = tight_union(&points);
            Ok(Node::Leaf { bbox, points })
        }
        codec::TAG_INTERNAL => {
            let mut children = Vec::with_capacity(count);
            for _ in 0..count {
                children.push(read_node_generic(r)?);
            }
            let bbox = tight_union(&children);
            Ok(Node::Internal { bbox, children })
        }
        other => Err(crate::error::SpartError::Format(format!(
            "unknown node tag {other}"
        ))),
    }
}
