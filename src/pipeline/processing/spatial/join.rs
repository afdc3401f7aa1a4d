//! Point-to-building joins on an R-tree of building centroids.

use rstar::{PointDistance, RTree, RTreeObject, AABB};
use std::collections::{BTreeMap, HashSet};
use std::f64::consts::PI;

/// Circular buffer around one building centroid
#[derive(Debug, Clone)]
struct BufferNode {
    building: usize,
    center: [f64; 2],
    radius: f64,
}

impl RTreeObject for BufferNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.center[0] - self.radius, self.center[1] - self.radius],
            [self.center[0] + self.radius, self.center[1] + self.radius],
        )
    }
}

impl PointDistance for BufferNode {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = point[0] - self.center[0];
        let dy = point[1] - self.center[1];
        dx * dx + dy * dy
    }

    fn contains_point(&self, point: &[f64; 2]) -> bool {
        self.distance_2(point) <= self.radius * self.radius
    }
}

/// Buffer radius for a footprint of `area`: the circle of `multiplier` times its area.
pub fn buffer_radius(area: f64, multiplier: f64) -> f64 {
    (multiplier * area / PI).sqrt()
}

/// One output pairing; `building` is `None` for a point no buffer reached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pairing {
    pub point: usize,
    pub building: Option<usize>,
    pub distance: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinResult {
    pub pairings: Vec<Pairing>,
    /// Every `(point, building)` match before per-building resolution
    pub candidates: Vec<(usize, usize)>,
    /// Points that reached a building but lost it to a closer point
    pub dropped: usize,
}

impl JoinResult {
    pub fn assigned_points(&self) -> usize {
        self.pairings
            .iter()
            .filter(|p| p.building.is_some())
            .map(|p| p.point)
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Keep, per building, the closest candidate point (lowest point index on
/// ties), then add unmatched points and order by point then building.
fn resolve_per_building(point_count: usize, candidates: Vec<(usize, usize, f64)>) -> JoinResult {
    let mut reached = vec![false; point_count];
    let mut winners: BTreeMap<usize, (usize, f64)> = BTreeMap::new();
    let matched = candidates.iter().map(|&(point, building, _)| (point, building)).collect();
    for (point, building, distance) in candidates {
        reached[point] = true;
        let better = match winners.get(&building) {
            Some(&(best_point, best)) => distance < best || (distance == best && point < best_point),
            None => true,
        };
        if better {
            winners.insert(building, (point, distance));
        }
    }

    let mut pairings: Vec<Pairing> = winners
        .into_iter()
        .map(|(building, (point, distance))| Pairing {
            point,
            building: Some(building),
            distance,
        })
        .collect();
    let won: HashSet<usize> = pairings.iter().map(|p| p.point).collect();
    let mut dropped = 0;
    for (point, was_reached) in reached.iter().enumerate() {
        if !was_reached {
            pairings.push(Pairing {
                point,
                building: None,
                distance: f64::NAN,
            });
        } else if !won.contains(&point) {
            dropped += 1;
        }
    }
    pairings.sort_by(|a, b| a.point.cmp(&b.point).then(a.building.cmp(&b.building)));
    JoinResult {
        pairings,
        candidates: matched,
        dropped,
    }
}

/// Containment join: a point belongs to every buffer whose centroid lies
/// within the buffer radius.
pub fn containment_join(points: &[[f64; 2]], centroids: &[[f64; 2]], radii: &[f64]) -> JoinResult {
    let nodes: Vec<BufferNode> = centroids
        .iter()
        .zip(radii)
        .enumerate()
        .map(|(building, (&center, &radius))| BufferNode {
            building,
            center,
            radius,
        })
        .collect();
    let tree = RTree::bulk_load(nodes);

    let mut candidates = Vec::new();
    for (point, xy) in points.iter().enumerate() {
        for node in tree.locate_all_at_point(xy) {
            candidates.push((point, node.building, node.distance_2(xy).sqrt()));
        }
    }
    resolve_per_building(points.len(), candidates)
}

/// Nearest join: every point picks its nearest centroid (lowest building
/// index on ties), then each building keeps its closest point.
pub fn nearest_join(points: &[[f64; 2]], centroids: &[[f64; 2]]) -> JoinResult {
    let nodes: Vec<BufferNode> = centroids
        .iter()
        .enumerate()
        .map(|(building, &center)| BufferNode {
            building,
            center,
            radius: 0.0,
        })
        .collect();
    let tree = RTree::bulk_load(nodes);

    let mut candidates = Vec::new();
    for (point, xy) in points.iter().enumerate() {
        let mut nearest = tree.nearest_neighbor_iter_with_distance_2(xy);
        if let Some((first, best)) = nearest.next() {
            let building = nearest
                .take_while(|(_, d)| *d == best)
                .map(|(node, _)| node.building)
                .fold(first.building, usize::min);
            candidates.push((point, building, best.sqrt()));
        }
    }
    resolve_per_building(points.len(), candidates)
}
