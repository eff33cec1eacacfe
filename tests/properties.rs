//! Cross-family property tests, covering spec.md §8's quantified invariants
//! against the public `SpatialIndex` surface rather than any one family's
//! internals.

use quickcheck_macros::quickcheck;

use spart::{Boundary, KdTree2, Payload, Point, Quadtree, RStarTree2, RTree2, SpatialIndex};

fn dedup_coords(raw: Vec<(i16, i16)>) -> Vec<[f64; 2]> {
    let mut seen = std::collections::HashSet::new();
    raw.into_iter()
        .filter(|c| seen.insert(*c))
        .map(|(x, y)| [x as f64, y as f64])
        .take(60)
        .collect()
}

fn labeled_points(coords: &[[f64; 2]]) -> Vec<Point<2>> {
    coords
        .iter()
        .enumerate()
        .map(|(i, c)| Point::new(*c, Payload::Int(i as i64)))
        .collect()
}

fn brute_force_knn(points: &[Point<2>], q: &[f64; 2], k: usize) -> Vec<f64> {
    let mut dists: Vec<f64> = points
        .iter()
        .map(|p| ((p.coords[0] - q[0]).powi(2) + (p.coords[1] - q[1]).powi(2)).sqrt())
        .collect();
    dists.sort_by(|a, b| a.partial_cmp(b).unwrap());
    dists.truncate(k);
    dists
}

/// Property 1 (population): a kNN query with `k >= n` returns every
/// remaining point, across every family.
#[quickcheck]
fn population_after_inserts(raw: Vec<(i16, i16)>) -> bool {
    let coords = dedup_coords(raw);
    let points = labeled_points(&coords);
    let n = points.len();

    let mut kd = KdTree2::new();
    let mut rt = RTree2::new(4).unwrap();
    let mut rst = RStarTree2::new(4).unwrap();
    for p in &points {
        kd.insert(p.clone());
        rt.insert(p.clone());
        rst.insert(p.clone());
    }

    let q = [0.0, 0.0];
    let k = n.max(1);
    kd.knn_search(&q, k).unwrap().len() == n
        && rt.knn_search(&q, k).unwrap().len() == n
        && rst.knn_search(&q, k).unwrap().len() == n
}

/// Property 3 (kNN ordering): results are non-decreasing in distance and
/// match the brute-force distance sequence.
#[quickcheck]
fn knn_ordering_matches_brute_force(raw: Vec<(i16, i16)>, k_seed: u8) -> bool {
    let coords = dedup_coords(raw);
    if coords.is_empty() {
        return true;
    }
    let points = labeled_points(&coords);
    let k = (k_seed as usize % points.len()) + 1;
    let q = [1.0, -2.0];

    let mut kd = KdTree2::new();
    for p in &points {
        kd.insert(p.clone());
    }
    let res = kd.knn_search(&q, k).unwrap();
    let got: Vec<f64> = res
        .iter()
        .map(|p| ((p.coords[0] - q[0]).powi(2) + (p.coords[1] - q[1]).powi(2)).sqrt())
        .collect();
    let expected = brute_force_knn(&points, &q, k);

    got.len() == expected.len()
        && got.windows(2).all(|w| w[0] <= w[1] + 1e-9)
        && got.iter().zip(expected.iter()).all(|(a, b)| (a - b).abs() < 1e-9)
}

/// Property 4 (range correctness): `range_search(q, r)` returns exactly the
/// points within `r` of `q`, no more and no fewer.
#[quickcheck]
fn range_search_is_exact(raw: Vec<(i16, i16)>, r_seed: u8) -> bool {
    let coords = dedup_coords(raw);
    let points = labeled_points(&coords);
    let r = r_seed as f64;
    let q = [0.0, 0.0];

    let mut kd = KdTree2::new();
    for p in &points {
        kd.insert(p.clone());
    }
    let got: std::collections::HashSet<i64> = kd
        .range_search(&q, r)
        .unwrap()
        .into_iter()
        .map(|p| match p.data {
            Payload::Int(i) => i,
            _ => unreachable!(),
        })
        .collect();
    let expected: std::collections::HashSet<i64> = points
        .iter()
        .filter(|p| ((p.coords[0] - q[0]).powi(2) + (p.coords[1] - q[1]).powi(2)).sqrt() <= r)
        .map(|p| match p.data {
            Payload::Int(i) => i,
            _ => unreachable!(),
        })
        .collect();
    got == expected
}

/// Property 6 (bulk equivalence): `insert_bulk` yields the same population
/// and query results as inserting the same points one at a time.
#[quickcheck]
fn bulk_insert_equals_sequential(raw: Vec<(i16, i16)>) -> bool {
    let coords = dedup_coords(raw);
    let points = labeled_points(&coords);

    let mut bulk = KdTree2::new();
    bulk.insert_bulk(points.clone());
    let mut seq = KdTree2::new();
    for p in points.clone() {
        seq.insert(p);
    }

    if bulk.len() != seq.len() {
        return false;
    }
    let q = [3.0, 4.0];
    let k = points.len().max(1);
    let bulk_dists: Vec<f64> = bulk
        .knn_search(&q, k)
        .unwrap()
        .iter()
        .map(|p| ((p.coords[0] - q[0]).powi(2) + (p.coords[1] - q[1]).powi(2)).sqrt())
        .collect();
    let seq_dists: Vec<f64> = seq
        .knn_search(&q, k)
        .unwrap()
        .iter()
        .map(|p| ((p.coords[0] - q[0]).powi(2) + (p.coords[1] - q[1]).powi(2)).sqrt())
        .collect();
    bulk_dists == seq_dists
}

/// Property 5 (round-trip): `load(save(T))` agrees with `T` on kNN and
/// range queries, for every family.
#[test]
fn round_trip_agrees_across_families() {
    let coords: Vec<[f64; 2]> = (0..30).map(|i| [(i * 7 % 53) as f64, (i * 11 % 41) as f64]).collect();
    let points = labeled_points(&coords);
    let q = [10.0, 10.0];

    fn check<T: SpatialIndex<2>>(mut t: T, points: &[Point<2>], q: &[f64; 2]) {
        for p in points {
            t.insert(p.clone());
        }
        let mut buf = Vec::new();
        t.save(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let loaded = T::load(&mut cursor).unwrap();
        assert_eq!(t.knn_search(q, 5).unwrap(), loaded.knn_search(q, 5).unwrap());
        assert_eq!(t.range_search(q, 20.0).unwrap().len(), loaded.range_search(q, 20.0).unwrap().len());
    }

    check(KdTree2::new(), &points, &q);
    check(RTree2::new(4).unwrap(), &points, &q);
    check(RStarTree2::new(4).unwrap(), &points, &q);

    let boundary = Boundary::<2>::new([0.0, 0.0], [200.0, 200.0]).unwrap();
    check(Quadtree::new(boundary, 4).unwrap(), &points, &q);
}

/// Property 8 (deletion identity): deleting a point removes exactly one
/// matching entry and leaves every other point discoverable.
#[quickcheck]
fn delete_removes_exactly_one(raw: Vec<(i16, i16)>, idx_seed: u8) -> bool {
    let coords = dedup_coords(raw);
    if coords.is_empty() {
        return true;
    }
    let points = labeled_points(&coords);
    let idx = idx_seed as usize % points.len();
    let target = points[idx].clone();

    let mut kd = KdTree2::new();
    for p in &points {
        kd.insert(p.clone());
    }
    let before = kd.len();
    if !kd.delete(&target.coords, &target.data) {
        return false;
    }
    if kd.len() != before - 1 {
        return false;
    }
    if kd.delete(&target.coords, &target.data) {
        return false; // second delete of the same point must fail
    }
    points
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != idx)
        .all(|(_, p)| {
            kd.knn_search(&p.coords, kd.len().max(1))
                .unwrap()
                .iter()
                .any(|h| h.data == p.data)
        })
}
